pub mod service;

pub use service::EventRelayService;
