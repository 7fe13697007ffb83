pub mod backup;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod extractor;
pub mod monitor;
pub mod orchestrator;
pub mod placeholder;
pub mod preset;
pub mod providers;
pub mod state;

pub use backup::BackupStore;
pub use codec::{decode, encode, CardData, CardRecord, CodecError};
pub use config::{ConfigError, TranslatorConfig};
pub use extractor::{
    extract_record, BracketKind, CardField, Extraction, FieldPath, Piece, Segment, SegmentOptions,
};
pub use monitor::{process_card, DirectoryMonitor, MonitorError};
pub use orchestrator::{Orchestrator, SegmentStatus, TranslationReport};
pub use placeholder::{NameOptions, ProtectedText};
pub use preset::{translate_preset, translate_preset_file, PresetError};
pub use providers::{
    Gender, Provider, ProviderError, ProviderKind, TranslateBackend, TranslateOptions,
};
pub use state::{FileState, StateError, StateStore};
