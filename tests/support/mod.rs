#![allow(dead_code)]

pub mod config;
pub mod manager;
pub mod websocket;
