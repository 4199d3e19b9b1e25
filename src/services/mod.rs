//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation.

pub mod ai;
pub mod battery;
pub mod chat;
pub mod persona;
pub mod robot;
