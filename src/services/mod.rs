pub mod documentation;
pub mod fanout;
pub mod monitor_service;
pub mod race_service;
pub mod replay_service;
pub mod self_healing;
pub mod websocket_service;
