pub mod api_router;
pub mod billing;
pub mod config;
pub mod family;
pub mod gateway;
pub mod loyalty;
pub mod shared;
pub mod storage;
pub mod subscription;
