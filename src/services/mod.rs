pub mod artifacts;
pub mod browser;
pub mod capture;
pub mod clock;
pub mod orchestrator;
pub mod retry;
pub mod review;
pub mod summary;
pub mod waiter;
