//! Build lifecycle predicates
//!
//! Pure functions over an optional [`Build`]. An absent build answers every
//! question with its empty value, so callers can ask about "the last build"
//! without checking whether there is one.
//!
//! A present build with no `Succeeded` condition has not been picked up yet
//! and counts as running.

use k8s_openapi::api::core::v1::Pod;
use oci_distribution::Reference;

use crate::crd::{
    get_condition, includes_buildpack, Binding, Build, BuildpackMetadata, ConditionStatus,
    BUILD_NEEDED_ANNOTATION, BUILD_REASON_ANNOTATION, BUILD_REASON_STACK,
    COMPATIBILITY_BINDINGS_ANNOTATION, CONDITION_SUCCEEDED, IMAGE_GENERATION_LABEL,
};
use crate::{Error, Result};

fn succeeded(build: &Build) -> ConditionStatus {
    build
        .status
        .as_ref()
        .and_then(|s| get_condition(&s.conditions, CONDITION_SUCCEEDED))
        .map(|c| c.status)
        .unwrap_or_default()
}

fn annotation<'a>(build: &'a Build, key: &str) -> Option<&'a str> {
    build
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Whether the build has not reached a terminal outcome
pub fn is_running(build: Option<&Build>) -> bool {
    build.is_some_and(|b| succeeded(b) == ConditionStatus::Unknown)
}

/// Whether the build completed successfully
pub fn is_success(build: Option<&Build>) -> bool {
    build.is_some_and(|b| succeeded(b) == ConditionStatus::True)
}

/// Whether the build failed
pub fn is_failure(build: Option<&Build>) -> bool {
    build.is_some_and(|b| succeeded(b) == ConditionStatus::False)
}

/// Whether the build reached a terminal outcome
pub fn finished(build: Option<&Build>) -> bool {
    build.is_some_and(|b| succeeded(b) != ConditionStatus::Unknown)
}

/// Name of the build, empty when absent
pub fn build_ref(build: Option<&Build>) -> String {
    build
        .and_then(|b| b.metadata.name.clone())
        .unwrap_or_default()
}

/// Suffix of the pod executing a build
pub const BUILD_POD_SUFFIX: &str = "-build-pod";

/// Longest object name the API server accepts for a pod
const MAX_NAME_LEN: usize = 63;

/// Name of the pod executing the build, empty when absent
///
/// Long build names are truncated so the result stays a valid name.
pub fn pod_name(build: Option<&Build>) -> String {
    let Some(name) = build.and_then(|b| b.metadata.name.as_deref()) else {
        return String::new();
    };
    let head = MAX_NAME_LEN - BUILD_POD_SUFFIX.len();
    let parent: String = name.chars().take(head).collect();
    format!("{}{BUILD_POD_SUFFIX}", parent.trim_end_matches('-'))
}

/// Whether the build pod finished but the build has not been marked successful
///
/// This is the window in which build metadata can be read off the pod.
pub fn metadata_ready(build: Option<&Build>, pod: &Pod) -> bool {
    let pod_succeeded = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded");
    build.is_some_and(|b| succeeded(b) != ConditionStatus::True) && pod_succeeded
}

/// Trigger reason recorded on the build, empty when absent
pub fn build_reason(build: Option<&Build>) -> &str {
    build
        .and_then(|b| annotation(b, BUILD_REASON_ANNOTATION))
        .unwrap_or_default()
}

/// Generation of the image that created the build; 0 when unknown
pub fn image_generation(build: Option<&Build>) -> i64 {
    build
        .and_then(|b| b.metadata.labels.as_ref())
        .and_then(|labels| labels.get(IMAGE_GENERATION_LABEL))
        .and_then(|generation| generation.parse().ok())
        .unwrap_or(0)
}

/// Stack id of a successful build, empty otherwise
pub fn stack_id(build: Option<&Build>) -> &str {
    match build {
        Some(b) if is_success(build) => b
            .status
            .as_ref()
            .map(|s| s.stack.id.as_str())
            .unwrap_or_default(),
        _ => "",
    }
}

/// Image produced by a successful build, empty otherwise
pub fn built_image(build: Option<&Build>) -> &str {
    match build {
        Some(b) if is_success(build) => b
            .status
            .as_ref()
            .map(|s| s.latest_image.as_str())
            .unwrap_or_default(),
        _ => "",
    }
}

/// Canonical tag the build pushes to, empty when it has none
pub fn tag(build: Option<&Build>) -> &str {
    build
        .and_then(|b| b.spec.tags.first())
        .map(String::as_str)
        .unwrap_or_default()
}

/// Service account the build runs as, empty when absent
pub fn service_account(build: Option<&Build>) -> &str {
    build
        .map(|b| b.spec.service_account.as_str())
        .unwrap_or_default()
}

/// Whether a pending rebase is already satisfied by the current stack
///
/// True only when the build was triggered by a stack change and the build
/// before it ran on `current_stack_id`.
pub fn satisfies_stack(build: Option<&Build>, current_stack_id: &str) -> bool {
    let Some(b) = build else {
        return false;
    };
    let Some(last) = b.spec.last_build.as_ref() else {
        return false;
    };
    annotation(b, BUILD_REASON_ANNOTATION) == Some(BUILD_REASON_STACK)
        && last.stack_id == current_stack_id
}

/// Whether the build ran on a run image with the same identifier as `run_image`
///
/// Identifiers are the digest, else the tag, else `latest`. An unparseable
/// reference on either side compares unequal.
pub fn built_with_run_image(build: Option<&Build>, run_image: &str) -> bool {
    let Some(recorded) = build
        .and_then(|b| b.status.as_ref())
        .map(|s| s.stack.run_image.as_str())
        .filter(|r| !r.is_empty())
    else {
        return false;
    };

    match (identifier(recorded), identifier(run_image)) {
        (Some(built), Some(candidate)) => built == candidate,
        _ => false,
    }
}

fn identifier(image: &str) -> Option<String> {
    let reference = Reference::try_from(image).ok()?;
    let id = reference
        .digest()
        .or_else(|| reference.tag())
        .unwrap_or("latest");
    Some(id.to_string())
}

/// Whether every buildpack the build used is among `candidates`
pub fn built_with_buildpacks(build: Option<&Build>, candidates: &[BuildpackMetadata]) -> bool {
    let Some(b) = build else {
        return false;
    };
    b.status
        .as_ref()
        .map(|s| s.build_metadata.as_slice())
        .unwrap_or_default()
        .iter()
        .all(|bp| includes_buildpack(candidates, bp))
}

/// Whether another build was requested while this one ran
pub fn needs_additional_build(build: Option<&Build>) -> bool {
    build.is_some_and(|b| annotation(b, BUILD_NEEDED_ANNOTATION).is_some())
}

/// Compatibility bindings injected into the build
///
/// A missing or empty annotation means no bindings. A malformed one is an
/// error, never an empty list.
pub fn compatibility_bindings(build: Option<&Build>) -> Result<Vec<Binding>> {
    let raw = match build.and_then(|b| annotation(b, COMPATIBILITY_BINDINGS_ANNOTATION)) {
        None | Some("") => return Ok(Vec::new()),
        Some(raw) => raw,
    };
    serde_json::from_str(raw).map_err(|e| {
        Error::serialization(format!(
            "invalid {COMPATIBILITY_BINDINGS_ANNOTATION} annotation: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BuildSpec, BuildStack, BuildStatus, Condition, LastBuild};
    use std::collections::BTreeMap;

    const RUN_IMAGE_DIGEST: &str =
        "sha256:0c8ce1c1c3e8e4b6c1e9a5a3f1ad3a3e79b5f0b2c3d4e5f60718293a4b5c6d7e";
    const OTHER_DIGEST: &str =
        "sha256:f00dfeedf00dfeedf00dfeedf00dfeedf00dfeedf00dfeedf00dfeedf00dfeed";

    fn build() -> Build {
        Build::new("image-build-1", BuildSpec::default())
    }

    fn with_condition(mut b: Build, status: ConditionStatus) -> Build {
        b.status
            .get_or_insert_with(BuildStatus::default)
            .conditions
            .push(Condition::new(CONDITION_SUCCEEDED, status, "", ""));
        b
    }

    fn with_annotation(mut b: Build, key: &str, value: &str) -> Build {
        b.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        b
    }

    fn with_run_image(mut b: Build, run_image: &str) -> Build {
        b.status.get_or_insert_with(BuildStatus::default).stack = BuildStack {
            run_image: run_image.to_string(),
            id: "io.buildpacks.stacks.jammy".to_string(),
        };
        b
    }

    fn with_buildpacks(mut b: Build, bps: &[(&str, &str)]) -> Build {
        b.status.get_or_insert_with(BuildStatus::default).build_metadata = bps
            .iter()
            .map(|(id, v)| BuildpackMetadata::new(*id, *v))
            .collect();
        b
    }

    fn pod(phase: Option<&str>) -> Pod {
        Pod {
            status: Some(k8s_openapi::api::core::v1::PodStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    mod build_pod {
        use super::*;

        #[test]
        fn pod_name_appends_suffix() {
            assert_eq!(pod_name(Some(&build())), "image-build-1-build-pod");
            assert_eq!(pod_name(None), "");
        }

        #[test]
        fn long_build_names_are_truncated() {
            let long = format!("{}-{}", "a".repeat(52), "b".repeat(20));
            let name = pod_name(Some(&Build::new(&long, BuildSpec::default())));

            assert_eq!(name.len(), 62);
            assert_eq!(name, format!("{}{BUILD_POD_SUFFIX}", "a".repeat(52)));
        }

        #[test]
        fn metadata_ready_once_pod_succeeds_before_build_does() {
            let running = with_condition(build(), ConditionStatus::Unknown);
            assert!(metadata_ready(Some(&running), &pod(Some("Succeeded"))));
            assert!(!metadata_ready(Some(&running), &pod(Some("Running"))));
            assert!(!metadata_ready(Some(&running), &pod(None)));
            assert!(!metadata_ready(Some(&running), &Pod::default()));

            // No condition yet is not success either
            assert!(metadata_ready(Some(&build()), &pod(Some("Succeeded"))));
        }

        #[test]
        fn metadata_not_ready_after_build_succeeds() {
            let done = with_condition(build(), ConditionStatus::True);
            assert!(!metadata_ready(Some(&done), &pod(Some("Succeeded"))));
            assert!(!metadata_ready(None, &pod(Some("Succeeded"))));
        }
    }

    mod outcome {
        use super::*;

        #[test]
        fn absent_build_answers_false() {
            assert!(!is_running(None));
            assert!(!is_success(None));
            assert!(!is_failure(None));
            assert!(!finished(None));
            assert_eq!(build_ref(None), "");
            assert_eq!(image_generation(None), 0);
        }

        #[test]
        fn only_running_before_finish() {
            for b in [build(), with_condition(build(), ConditionStatus::Unknown)] {
                let b = Some(&b);
                assert!(!finished(b));
                assert!(is_running(b));
                assert!(!is_success(b));
                assert!(!is_failure(b));
            }
        }

        #[test]
        fn exactly_one_outcome_once_finished() {
            for status in [ConditionStatus::True, ConditionStatus::False] {
                let b = with_condition(build(), status);
                let b = Some(&b);
                assert!(finished(b));
                let outcomes = [is_running(b), is_success(b), is_failure(b)];
                assert_eq!(outcomes.iter().filter(|o| **o).count(), 1);
            }
            assert!(is_success(Some(&with_condition(build(), ConditionStatus::True))));
            assert!(is_failure(Some(&with_condition(build(), ConditionStatus::False))));
        }

        #[test]
        fn stack_and_image_only_reported_for_success() {
            let mut b = with_run_image(build(), "registry.example.com/run:jammy");
            b.status.as_mut().unwrap().latest_image =
                "registry.example.com/app@sha256:abc".to_string();

            assert_eq!(stack_id(Some(&b)), "");
            assert_eq!(built_image(Some(&b)), "");

            let b = with_condition(b, ConditionStatus::True);
            assert_eq!(stack_id(Some(&b)), "io.buildpacks.stacks.jammy");
            assert_eq!(built_image(Some(&b)), "registry.example.com/app@sha256:abc");
        }
    }

    mod stack {
        use super::*;

        fn rebase(prior_stack: &str) -> Build {
            let mut b = with_annotation(build(), BUILD_REASON_ANNOTATION, BUILD_REASON_STACK);
            b.spec.last_build = Some(LastBuild {
                image: "registry.example.com/app@sha256:abc".to_string(),
                stack_id: prior_stack.to_string(),
            });
            b
        }

        #[test]
        fn rebase_onto_unchanged_stack_is_satisfied() {
            let b = rebase("stack-A");
            assert!(satisfies_stack(Some(&b), "stack-A"));
            assert!(!satisfies_stack(Some(&b), "stack-B"));
        }

        #[test]
        fn other_reasons_never_satisfy() {
            let mut b = rebase("stack-A");
            b = with_annotation(b, BUILD_REASON_ANNOTATION, "COMMIT");
            assert!(!satisfies_stack(Some(&b), "stack-A"));
        }

        #[test]
        fn requires_a_prior_build() {
            let b = with_annotation(build(), BUILD_REASON_ANNOTATION, BUILD_REASON_STACK);
            assert!(!satisfies_stack(Some(&b), ""));
            assert!(!satisfies_stack(None, "stack-A"));
        }
    }

    mod run_image {
        use super::*;

        #[test]
        fn compares_digest_not_repository() {
            let b = with_run_image(
                build(),
                &format!("registry.example.com/run@{RUN_IMAGE_DIGEST}"),
            );
            assert!(built_with_run_image(
                Some(&b),
                &format!("mirror.example.com/other/run@{RUN_IMAGE_DIGEST}")
            ));
            assert!(!built_with_run_image(
                Some(&b),
                &format!("registry.example.com/run@{OTHER_DIGEST}")
            ));
        }

        #[test]
        fn compares_tags() {
            let b = with_run_image(build(), "registry.example.com/run:jammy");
            assert!(built_with_run_image(Some(&b), "docker.io/library/run:jammy"));
            assert!(!built_with_run_image(Some(&b), "registry.example.com/run:focal"));
        }

        #[test]
        fn malformed_references_compare_unequal() {
            let b = with_run_image(build(), "registry.example.com/run:jammy");
            assert!(!built_with_run_image(Some(&b), "NOT A REFERENCE"));

            let b = with_run_image(build(), "::::");
            assert!(!built_with_run_image(Some(&b), "registry.example.com/run:jammy"));
        }

        #[test]
        fn missing_run_image_is_false() {
            assert!(!built_with_run_image(Some(&build()), "registry.example.com/run"));
            assert!(!built_with_run_image(None, "registry.example.com/run"));
        }
    }

    mod buildpacks {
        use super::*;

        #[test]
        fn subset_of_candidates_matches() {
            let b = with_buildpacks(build(), &[("go", "1.0"), ("node", "2.0")]);
            let candidates = vec![
                BuildpackMetadata::new("go", "1.0"),
                BuildpackMetadata::new("node", "2.0"),
                BuildpackMetadata::new("java", "3.0"),
            ];
            assert!(built_with_buildpacks(Some(&b), &candidates));
        }

        #[test]
        fn version_change_is_a_mismatch() {
            let b = with_buildpacks(build(), &[("go", "1.0")]);
            assert!(!built_with_buildpacks(
                Some(&b),
                &[BuildpackMetadata::new("go", "1.1")]
            ));
        }

        #[test]
        fn adding_candidates_never_turns_true_false() {
            let b = with_buildpacks(build(), &[("go", "1.0"), ("node", "2.0")]);
            let all = [
                BuildpackMetadata::new("node", "2.0"),
                BuildpackMetadata::new("java", "3.0"),
                BuildpackMetadata::new("go", "1.0"),
                BuildpackMetadata::new("ruby", "4.0"),
            ];

            let mut previous = false;
            for n in 0..=all.len() {
                let result = built_with_buildpacks(Some(&b), &all[..n]);
                assert!(result || !previous, "result went from true to false at {n}");
                previous = result;
            }
            assert!(previous);
        }
    }

    mod annotations {
        use super::*;

        #[test]
        fn additional_build_marker_presence_is_enough() {
            assert!(!needs_additional_build(Some(&build())));
            let b = with_annotation(build(), BUILD_NEEDED_ANNOTATION, "");
            assert!(needs_additional_build(Some(&b)));
        }

        #[test]
        fn reason_and_generation() {
            let mut b = with_annotation(build(), BUILD_REASON_ANNOTATION, "CONFIG");
            b.metadata.labels = Some(BTreeMap::from([(
                IMAGE_GENERATION_LABEL.to_string(),
                "4".to_string(),
            )]));
            assert_eq!(build_reason(Some(&b)), "CONFIG");
            assert_eq!(image_generation(Some(&b)), 4);
            assert_eq!(build_ref(Some(&b)), "image-build-1");

            b.metadata.labels = Some(BTreeMap::from([(
                IMAGE_GENERATION_LABEL.to_string(),
                "four".to_string(),
            )]));
            assert_eq!(image_generation(Some(&b)), 0);
        }

        #[test]
        fn absent_bindings_are_empty() {
            assert!(compatibility_bindings(Some(&build())).unwrap().is_empty());
            assert!(compatibility_bindings(None).unwrap().is_empty());
            let b = with_annotation(build(), COMPATIBILITY_BINDINGS_ANNOTATION, "");
            assert!(compatibility_bindings(Some(&b)).unwrap().is_empty());
        }

        #[test]
        fn malformed_bindings_are_an_error() {
            let b = with_annotation(build(), COMPATIBILITY_BINDINGS_ANNOTATION, "{not json");
            let err = compatibility_bindings(Some(&b)).unwrap_err();
            assert!(matches!(err, Error::Serialization(_)));
        }

        #[test]
        fn bindings_are_parsed() {
            let b = with_annotation(
                build(),
                COMPATIBILITY_BINDINGS_ANNOTATION,
                r#"[{"name":"maven","secretRef":{"name":"settings"}}]"#,
            );
            let bindings = compatibility_bindings(Some(&b)).unwrap();
            assert_eq!(bindings.len(), 1);
            assert_eq!(bindings[0].name, "maven");
            assert_eq!(bindings[0].secret_ref.as_ref().unwrap().name, "settings");
            assert!(bindings[0].metadata_ref.is_none());
        }

        #[test]
        fn tag_and_account() {
            let mut b = build();
            b.spec.tags = vec!["registry.example.com/app".to_string(), "other".to_string()];
            b.spec.service_account = "builder".to_string();
            assert_eq!(tag(Some(&b)), "registry.example.com/app");
            assert_eq!(service_account(Some(&b)), "builder");
            assert_eq!(tag(None), "");
        }
    }
}
