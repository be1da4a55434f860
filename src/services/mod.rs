pub mod allocator;
pub mod gateway;
pub mod metrics;
pub mod repository;
pub mod sequencer;

pub use gateway::GatewayVerifier;
pub use repository::DonationRepository;
pub use sequencer::ReceiptSequencer;
