// src/lib.rs

pub mod config;
pub mod core;
pub mod error;
pub mod learning;
pub mod lesson;
pub mod logging;
pub mod persistence;

pub use crate::config::{TrainerConfig, WeightingPolicy};
pub use crate::core::engine::{Submission, Trainer};
pub use crate::core::types::{
    PhonemeSequence, SessionInput, SessionResult, SpokenWord, Transcript, TranscriptLine,
};
pub use crate::error::{Result, TrainerError};
pub use crate::learning::ErrorProfile;
pub use crate::lesson::{Conversation, LessonGenerator, LessonPayload};
pub use crate::persistence::{FileProfileStore, MemoryProfileStore, ProfileStore};
