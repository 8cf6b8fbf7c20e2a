pub mod game;
pub mod health;
pub mod monitor;
pub mod replay;
pub mod ws;
