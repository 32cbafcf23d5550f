//! Building and running pipelines from files

mod common;

use common::test_timeout;
use std::io::Write;
use visionflow::pipeline::PropertyValue;
use visionflow::{PipelineBuilder, PipelineConfig, ProcessingMode, StageRegistry, StageState};

const PIPELINE: &str = r#"
name = "from-file"

[[stages]]
name = "source"
class = "CounterSource"
properties = { count = 50, start = 10 }

[[stages]]
name = "double"
class = "Scale"
mode = { pool = { threads = 2 } }
properties = { factor = 2.0 }
inputs = { in = { capacity = 4 } }

[[stages]]
name = "echo"
class = "Repeater"
mode = "inline"
properties = { times = 2 }

[[stages]]
name = "sink"
class = "Collector"
mode = "inline"

[[connections]]
from = "source.out"
to = "double.in"

[[connections]]
from = "double.out"
to = "echo.in"

[[connections]]
from = "echo.out"
to = "sink.in"

[property_sets.halve.double]
factor = 0.5
"#;

fn write_pipeline(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn test_toml_pipeline_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pipeline(&dir, "pipeline.toml", PIPELINE);

    let config = PipelineConfig::load(&path).unwrap();
    let registry = StageRegistry::with_builtin_stages();
    let pipeline = PipelineBuilder::new().build(&config, &registry).unwrap();

    let double = pipeline.stage("double").unwrap();
    assert_eq!(double.mode(), ProcessingMode::Pool { threads: 2 });
    let handle = pipeline
        .stage("sink")
        .unwrap()
        .stage()
        .as_collector()
        .unwrap()
        .handle();

    pipeline.start().unwrap();
    let report = pipeline.run_to_completion(Some(test_timeout()));
    assert!(report.succeeded(), "{:?}", report.errors);
    assert_eq!(report.final_state, StageState::Stopped);

    let expected: Vec<i64> = (10..60).flat_map(|v| [v * 2, v * 2]).collect();
    assert_eq!(handle.objects::<i64>(), expected);
    // One start/end pair per repeated object.
    assert_eq!(handle.events().len(), 100);
}

#[test]
fn test_reconfigure_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pipeline(&dir, "pipeline.toml", PIPELINE);
    let config = PipelineConfig::load(&path).unwrap();
    let registry = StageRegistry::with_builtin_stages();
    let pipeline = PipelineBuilder::new().build(&config, &registry).unwrap();

    pipeline.reconfigure("halve").unwrap();
    assert_eq!(
        pipeline.stage("double").unwrap().property("factor"),
        Some(PropertyValue::Float(0.5))
    );
    assert!(pipeline.reconfigure("missing").is_err());
}

#[test]
fn test_json_report_written() {
    let dir = tempfile::tempdir().unwrap();
    let toml_path = write_pipeline(&dir, "pipeline.toml", PIPELINE);
    let json_path = dir.path().join("pipeline.json");

    // Same pipeline round-tripped through JSON.
    PipelineConfig::load(&toml_path)
        .unwrap()
        .save(&json_path)
        .unwrap();
    let config = PipelineConfig::load(&json_path).unwrap();
    let registry = StageRegistry::with_builtin_stages();
    let pipeline = PipelineBuilder::new().build(&config, &registry).unwrap();

    pipeline.start().unwrap();
    let report = pipeline.run_to_completion(Some(test_timeout()));

    let report_path = dir.path().join("report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&report).unwrap()).unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(parsed["pipeline"], "from-file");
    assert_eq!(parsed["final_state"], "Stopped");
    assert_eq!(parsed["stages"].as_array().unwrap().len(), 4);
    assert!(parsed["errors"].as_array().unwrap().is_empty());
}

#[test]
fn test_unknown_class_in_file() {
    let dir = tempfile::tempdir().unwrap();
    let text = PIPELINE.replace("class = \"Repeater\"", "class = \"Morphology\"");
    let path = write_pipeline(&dir, "pipeline.toml", &text);

    let config = PipelineConfig::load(&path).unwrap();
    let registry = StageRegistry::with_builtin_stages();
    let err = PipelineBuilder::new().build(&config, &registry).unwrap_err();
    assert!(err.to_string().contains("Morphology"));
}
