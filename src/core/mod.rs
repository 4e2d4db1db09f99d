pub mod realtime;

// Re-export commonly used types for convenience
pub use realtime::{
    GenerationLimits, RealtimeError, RealtimeResult, ResponseOptions, ResponseOutcome, Session,
    SessionConfig, SessionOptions, SessionStatus,
};
