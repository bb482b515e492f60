pub mod adapter;
pub mod cache;
pub mod carousel;
pub mod config;
pub mod error;
pub mod events;
pub mod platform {
    pub mod display_power;
}
pub mod processing {
    pub mod layout;
}
pub mod tasks {
    pub mod controller;
    pub mod fetcher;
    pub mod loader;
    pub mod viewer;
}
