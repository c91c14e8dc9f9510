pub mod api_client;
pub mod grace_timer;
pub mod metadata;
pub mod normalizer;
pub mod notifier;
pub mod orchestrator;
pub mod poller;
pub mod state_storage;
pub mod store;
pub mod transfer;
