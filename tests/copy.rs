mod common;

use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use cometx::copy::{plan_local, plan_remote, validate_scopes};
use cometx::domain::{CometPath, Identifier};
use cometx::error::CometxError;

use common::FakeComet;

fn scope(value: &str) -> Identifier {
    value.parse::<CometPath>().unwrap().into_scope(value).unwrap()
}

#[test]
fn scope_combinations() {
    let cases = [
        ("team", "other", true),
        ("team/*", "other", true),
        ("team", "other/proj", false),
        ("team/vision", "other/proj", true),
        ("team/vision", "other", false),
        ("team/vision", "other/proj/exp", false),
        ("team/vision/abc", "other/proj", true),
        ("team/vision/abc", "other", false),
        ("team/vision/ab*", "other/proj", false),
        ("team/vision", "other/pro*", false),
    ];
    for (source, destination, allowed) in cases {
        let result = validate_scopes(&scope(source), &scope(destination));
        if allowed {
            assert!(result.is_ok(), "{source} -> {destination} should be allowed");
        } else {
            assert_matches!(
                result,
                Err(CometxError::IncompatibleScope { .. }),
                "{source} -> {destination} should be rejected"
            );
        }
    }
}

#[test]
fn local_plan_skips_reserved_folders() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    for dir in [
        "team/vision/abc",
        "team/vision/def",
        "team/vision/.cache",
        "team/vision/old~",
        "team/audio/xyz",
        "team/reports/weekly",
        "team/artifacts/dataset",
        "team/model-registry/resnet",
    ] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    fs::write(root.join("team/vision/project_metadata.json"), "{}").unwrap();

    let plan = plan_local(&root, &scope("team"), &scope("mirror")).unwrap();
    let found: Vec<_> = plan
        .entries
        .iter()
        .map(|entry| {
            (
                entry.source_project.as_str(),
                entry.experiment.as_str(),
                entry.destination_project.as_str(),
            )
        })
        .collect();
    assert_eq!(
        found,
        vec![
            ("audio", "xyz", "audio"),
            ("vision", "abc", "vision"),
            ("vision", "def", "vision"),
        ]
    );
    assert_eq!(
        plan.destination_projects(),
        vec![("audio", "audio"), ("vision", "vision")]
    );

    let plan = plan_local(&root, &scope("team/vision/def"), &scope("mirror/renamed")).unwrap();
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].destination_project, "renamed");
    assert_eq!(plan.entries[0].destination_workspace, "mirror");
}

#[test]
fn local_plan_needs_workspace_folder() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    assert_matches!(
        plan_local(&root, &scope("team"), &scope("mirror")),
        Err(CometxError::NotFound(_))
    );
}

#[test]
fn remote_plan_matches_names() {
    let comet = FakeComet::new()
        .with_project("team", "vision")
        .with_experiment("team", "vision", "k2", Some("run-b"))
        .with_experiment("team", "vision", "k1", Some("run-a"))
        .with_experiment("team", "vision", "k3", Some("eval"));

    let plan = plan_remote(&comet, &scope("team/vision"), &scope("team/shared")).unwrap();
    let keys: Vec<_> = plan.entries.iter().map(|entry| entry.experiment.as_str()).collect();
    assert_eq!(keys, vec!["k1", "k2", "k3"]);
    assert!(plan.entries.iter().all(|entry| entry.destination_project == "shared"));

    let plan = plan_remote(&comet, &scope("team/vision/eval"), &scope("team/shared")).unwrap();
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].experiment, "k3");
}
