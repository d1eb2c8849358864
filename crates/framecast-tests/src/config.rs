//! Configuration structs are plain data loadable from JSON.

use crate::support::v210;
use framecast_core::FrameTime;
use framecast_dispatch::{DispatchConfig, OptimizationFlags};
use framecast_gpu::{ChromaFilter, ConversionMode, ConverterConfig};
use framecast_media::SequenceConfig;
use std::path::PathBuf;

#[test]
fn dispatch_config_round_trips_through_json() {
    let config = DispatchConfig {
        name: "broadcast-uhd".to_string(),
        input_format: v210(1920, 1080),
        output_format: v210(1920, 1080),
        queue_capacity: 4,
        flags: OptimizationFlags {
            async_input: true,
            async_output: true,
            multiple_contexts: false,
            persistent_mapping: false,
        },
    };

    let json = serde_json::to_string_pretty(&config).unwrap();
    let loaded: DispatchConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(loaded.name, config.name);
    assert_eq!(loaded.input_format, config.input_format);
    assert_eq!(loaded.output_format, config.output_format);
    assert_eq!(loaded.queue_capacity, config.queue_capacity);
    assert_eq!(loaded.flags, config.flags);
}

#[test]
fn sequence_config_round_trips_through_json() {
    let config = SequenceConfig {
        directory: PathBuf::from("/data/sequences/horse"),
        file_suffix: ".v210".to_string(),
        format: v210(1920, 1080),
        frame_duration: FrameTime::new(1001, 30000),
        loop_count: 2,
    };

    let json = serde_json::to_string(&config).unwrap();
    let loaded: SequenceConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(loaded.directory, config.directory);
    assert_eq!(loaded.file_suffix, config.file_suffix);
    assert_eq!(loaded.format, config.format);
    assert_eq!(loaded.frame_duration, config.frame_duration);
    assert_eq!(loaded.loop_count, config.loop_count);
}

#[test]
fn converter_config_parses_from_literal_json() {
    let json = r#"{
        "mode": "HostScalar",
        "chroma_filter": "Replicate",
        "persistent_mapping": false
    }"#;
    let config: ConverterConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.mode, ConversionMode::HostScalar);
    assert_eq!(config.chroma_filter, ChromaFilter::Replicate);
    assert!(!config.persistent_mapping);
}
