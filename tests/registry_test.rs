mod common;

use std::os::fd::AsFd;
use std::sync::Arc;
use std::thread;

use common::*;
use tclens::metrics::{PrometheusStats, METRIC_TC_PROGRAMS};
use tclens::{
    AttachError, AttachMode, FeatureFlags, LinkInfo, NetDevice, ProgramTemplate, SetupError,
    TrafficDirection,
};

fn all_flags() -> FeatureFlags {
    FeatureFlags {
        ingress_enabled: true,
        raw_packet_enabled: true,
    }
}

#[test]
fn test_concrete_scenario() {
    let registry = two_template_registry();
    let netns = netns_handle();
    let device = NetDevice::new(7, 100, "eth0");

    registry.setup(&device, netns.as_fd(), all_flags()).unwrap();
    assert_eq!(registry.len(), 2);

    let attempts_before = registry.driver().with(|s| s.attempts.len());
    let second = registry.setup(&device, netns.as_fd(), all_flags());
    assert_eq!(second, Ok(()));
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.driver().with(|s| s.attempts.len()), attempts_before);

    registry.flush_namespace(100);
    assert_eq!(registry.len(), 0);
    assert_eq!(registry.resolve_device_name(7, 100), None);
}

#[test]
fn test_setup_is_idempotent_across_renames() {
    let registry = two_template_registry();
    let netns = netns_handle();

    registry
        .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();
    registry
        .setup(&NetDevice::new(7, 100, "renamed0"), netns.as_fd(), all_flags())
        .unwrap();

    assert_eq!(registry.len(), 2);
    // the name observed at attach time is kept
    assert_eq!(registry.resolve_device_name(7, 100), Some("eth0".to_string()));
}

#[test]
fn test_resolve_device_name_prefers_first_attached() {
    // each registry gets a fresh map, so iteration order varies between runs
    for _ in 0..16 {
        let registry = two_template_registry();
        let netns = netns_handle();

        registry
            .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), FeatureFlags::default())
            .unwrap();
        registry
            .setup(&NetDevice::new(7, 100, "renamed0"), netns.as_fd(), all_flags())
            .unwrap();

        assert_eq!(registry.len(), 2);
        for _ in 0..4 {
            assert_eq!(registry.resolve_device_name(7, 100), Some("eth0".to_string()));
        }
    }
}

#[test]
fn test_setup_respects_feature_flags() {
    let registry = two_template_registry();
    let netns = netns_handle();
    let device = NetDevice::new(7, 100, "eth0");

    registry
        .setup(&device, netns.as_fd(), FeatureFlags::default())
        .unwrap();
    assert_eq!(registry.len(), 1);

    // enabling ingress later only adds the missing template
    registry.setup(&device, netns.as_fd(), all_flags()).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.driver().with(|s| s.attempts.clone()),
        vec!["funcB".to_string(), "funcA".to_string()]
    );
}

#[test]
fn test_setup_passes_netns_constant_and_handles() {
    let registry = registry_with(vec![
        template("funcA", TrafficDirection::Ingress),
        ProgramTemplate::new("tclens", "rawB", TrafficDirection::Egress, AttachMode::RawPacket),
    ]);
    let netns = netns_handle();

    registry
        .setup(&NetDevice::new(3, 4026531840, "eth0"), netns.as_fd(), all_flags())
        .unwrap();

    let params = registry.driver().with(|s| s.last_params.clone());
    assert_eq!(params.len(), 2);
    assert!(params.iter().all(|p| p.priority == 10));
    assert_eq!(params[1].mode, AttachMode::RawPacket);

    let constants = registry.driver().with(|s| s.constants.clone());
    assert_eq!(constants.len(), 2);
    for edits in constants {
        assert_eq!(edits, vec![("NETNS", 4026531840)]);
    }

    for (key, _) in registry.snapshot() {
        assert_eq!(key.device.netns, 4026531840);
    }

    let names = registry.names();
    let name = names
        .get("tclens_rawB_3_4026531840")
        .expect("program name registered");
    assert_eq!(name.func_name, "rawB");
    assert_eq!(name.module, "tclens");
}

#[test]
fn test_link_not_found_short_circuits() {
    let registry = registry_with(vec![
        template("t1", TrafficDirection::Egress),
        template("t2", TrafficDirection::Egress),
        template("t3", TrafficDirection::Egress),
        template("t4", TrafficDirection::Egress),
    ]);
    registry.driver().with(|s| {
        s.failures
            .insert("t1".into(), AttachError::Attach("busy".into()));
        s.failures
            .insert("t2".into(), AttachError::LinkNotFound("ifindex 7".into()));
    });
    let netns = netns_handle();

    let err = registry
        .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap_err();

    assert!(err.is_fatal());
    match err {
        SetupError::LinkNotFound { template, error } => {
            assert_eq!(template.func_name, "t2");
            assert_eq!(error, AttachError::LinkNotFound("ifindex 7".into()));
        }
        other => panic!("expected link not found, got {:?}", other),
    }
    assert_eq!(
        registry.driver().with(|s| s.attempts.clone()),
        vec!["t1".to_string(), "t2".to_string()]
    );
    assert!(registry.is_empty());
}

#[test]
fn test_recoverable_failures_are_collected() {
    let registry = registry_with(vec![
        template("t1", TrafficDirection::Egress),
        template("t2", TrafficDirection::Egress),
        template("t3", TrafficDirection::Egress),
    ]);
    registry.driver().with(|s| {
        s.failures
            .insert("t1".into(), AttachError::Attach("memlock limit".into()));
        s.failures
            .insert("t3".into(), AttachError::Attach("file exists".into()));
    });
    let netns = netns_handle();

    let err = registry
        .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap_err();

    match &err {
        SetupError::Partial(failures) => {
            let failed: Vec<_> = failures.iter().map(|(t, _)| t.func_name.clone()).collect();
            assert_eq!(failed, vec!["t1".to_string(), "t3".to_string()]);
        }
        other => panic!("expected partial failure, got {:?}", other),
    }
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.driver().with(|s| s.attempts.len()), 3);

    // failed templates are retried on the next setup
    registry.driver().with(|s| s.failures.clear());
    registry
        .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_flush_namespace_is_complete() {
    let registry = two_template_registry();
    let netns = netns_handle();

    for (ifindex, ns) in [(2, 100), (3, 100), (2, 200)] {
        registry
            .setup(&NetDevice::new(ifindex, ns, "eth"), netns.as_fd(), all_flags())
            .unwrap();
    }
    assert_eq!(registry.len(), 6);

    // detach errors must not leave orphans behind
    registry.driver().with(|s| s.fail_detach = true);
    registry.flush_namespace(100);

    let counts = registry.namespace_counts();
    assert_eq!(counts.get(&100), None);
    assert_eq!(counts.get(&200), Some(&2));
    assert!(registry
        .select_active()
        .iter()
        .all(|s| !s.uid.ends_with("_100")));
    assert_eq!(registry.driver().with(|s| s.detached.len()), 4);
    assert_eq!(registry.names().len(), 2);
}

#[test]
fn test_flush_unknown_namespace_is_noop() {
    let registry = two_template_registry();
    let netns = netns_handle();
    registry
        .setup(&NetDevice::new(2, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();

    registry.flush_namespace(999);
    assert_eq!(registry.len(), 2);
    assert!(registry.driver().with(|s| s.detached.is_empty()));
}

#[test]
fn test_flush_inactive_removes_and_counts() {
    let registry = registry_with(vec![template("funcB", TrafficDirection::Egress)]);
    let netns = netns_handle();

    // ns 100: eth0 live, veth0 lazily deleted, tun0 without MAC, gone0 inactive
    // ns 200: eth0 live, flaky0 active but unresolvable
    let devices = [
        NetDevice::new(1, 100, "eth0"),
        NetDevice::new(2, 100, "veth0"),
        NetDevice::new(3, 100, "tun0"),
        NetDevice::new(4, 100, "gone0"),
        NetDevice::new(1, 200, "eth0"),
        NetDevice::new(2, 200, "flaky0"),
    ];
    for device in &devices {
        registry.setup(device, netns.as_fd(), all_flags()).unwrap();
    }

    registry.driver().with(|s| {
        s.links.insert(
            (3, 100),
            LinkInfo {
                name: "tun0".into(),
                hardware_addr: Vec::new(),
            },
        );
        s.inactive.insert("tclens_funcB_4_100".into());
        s.unresolvable.insert("tclens_funcB_2_200".into());
    });

    let counts = registry.flush_inactive(|name| name.starts_with("veth"));

    assert_eq!(counts.get(&100), Some(&1));
    assert_eq!(counts.get(&200), Some(&1));
    assert_eq!(registry.len(), 5);
    assert_eq!(registry.resolve_device_name(4, 100), None);
    assert_eq!(registry.resolve_device_name(2, 200), Some("flaky0".to_string()));
    assert_eq!(
        registry.driver().with(|s| s.detached.clone()),
        vec!["tclens_funcB_4_100".to_string()]
    );
}

#[test]
fn test_flush_inactive_keeps_active_keys_unchanged() {
    let registry = two_template_registry();
    let netns = netns_handle();
    registry
        .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();

    let mut before: Vec<String> = registry.snapshot().into_iter().map(|(k, _)| k.key()).collect();
    before.sort();

    let counts = registry.flush_inactive(|_| false);

    let mut after: Vec<String> = registry.snapshot().into_iter().map(|(k, _)| k.key()).collect();
    after.sort();
    assert_eq!(before, after);
    // two programs on the same interface are counted per program
    assert_eq!(counts.get(&100), Some(&2));
}

#[test]
fn test_lazy_predicate_not_called_for_empty_name() {
    let registry = registry_with(vec![template("funcB", TrafficDirection::Egress)]);
    let netns = netns_handle();
    registry
        .setup(&NetDevice::new(1, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();
    registry.driver().with(|s| {
        s.links.insert(
            (1, 100),
            LinkInfo {
                name: String::new(),
                hardware_addr: MAC.to_vec(),
            },
        );
    });

    let counts = registry.flush_inactive(|name| {
        assert!(!name.is_empty());
        true
    });
    assert_eq!(counts.get(&100), Some(&1));
}

#[test]
fn test_select_active_skips_inactive() {
    let registry = two_template_registry();
    let netns = netns_handle();
    registry
        .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();
    registry
        .driver()
        .with(|s| s.inactive.insert("tclens_funcA_7_100".into()));

    let selection = registry.select_active();
    assert_eq!(selection.len(), 1);
    assert!(selection.contains_uid("tclens_funcB_7_100"));
}

#[test]
fn test_best_effort_selection_survives_external_teardown() {
    let registry = Arc::new(two_template_registry());
    let netns = netns_handle();
    for ns in [100, 200] {
        registry
            .setup(&NetDevice::new(2, ns, "eth0"), netns.as_fd(), all_flags())
            .unwrap();
    }

    let selection = registry.select_active();
    assert_eq!(selection.len(), 4);

    // container exits: its namespace is torn down outside the registry
    let teardown = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            registry.driver().remove_namespace(100);
            registry.flush_namespace(100);
        })
    };
    teardown.join().unwrap();

    let report = selection.apply(|selector| {
        if registry.driver().is_attached(&selector.uid) {
            Ok(())
        } else {
            Err(format!("{} is gone", selector.uid))
        }
    });

    assert_eq!(report.applied, 2);
    assert_eq!(report.skipped_count(), 2);
    assert!(report.skipped.iter().all(|(s, _)| s.uid.ends_with("_100")));
}

#[test]
fn test_report_count_only_when_non_zero() {
    let registry = two_template_registry();
    let stats = PrometheusStats::new();

    registry.report_count(&stats);
    assert_eq!(stats.gauge_value(METRIC_TC_PROGRAMS, &[]), None);

    let netns = netns_handle();
    registry
        .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();
    registry.report_count(&stats);
    assert_eq!(stats.gauge_value(METRIC_TC_PROGRAMS, &[]), Some(2.0));
}

#[test]
fn test_flush_all() {
    let registry = two_template_registry();
    let netns = netns_handle();
    for ns in [100, 200, 300] {
        registry
            .setup(&NetDevice::new(2, ns, "eth0"), netns.as_fd(), all_flags())
            .unwrap();
    }

    registry.flush_all();
    assert!(registry.is_empty());
    assert!(registry.names().is_empty());
    assert!(registry.driver().with(|s| s.attached.is_empty()));
}

#[test]
fn test_concurrent_setup_and_queries() {
    let registry = Arc::new(two_template_registry());

    let writers: Vec<_> = (0..8u32)
        .map(|ns| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let netns = netns_handle();
                for ifindex in 1..=5 {
                    let device = NetDevice::new(ifindex, ns, format!("eth{}", ifindex));
                    registry.setup(&device, netns.as_fd(), all_flags()).unwrap();
                    registry.setup(&device, netns.as_fd(), all_flags()).unwrap();
                }
                if ns % 2 == 0 {
                    registry.flush_namespace(ns);
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..50 {
                    let selection = registry.select_active();
                    assert!(selection
                        .iter()
                        .all(|s| s.func_name == "funcA" || s.func_name == "funcB"));
                    if let Some(name) = registry.resolve_device_name(1, 1) {
                        assert_eq!(name, "eth1");
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let counts = registry.namespace_counts();
    assert_eq!(registry.len(), 4 * 5 * 2);
    for ns in 0..8u32 {
        let expected = if ns % 2 == 0 { None } else { Some(&10) };
        assert_eq!(counts.get(&ns), expected);
    }
    assert_eq!(registry.names().len(), registry.len());
}

#[test]
fn test_raw_packet_templates_use_raw_filter_handle() {
    use tclens::{ProbeRegistry, ProgramNames, RegistryConfig, TcCatalog};

    let config = RegistryConfig {
        module: "tclens".to_string(),
        classifier_priority: 5,
        classifier_handle: 1,
        raw_classifier_handle: 2,
    };
    let catalog = TcCatalog::with_templates(vec![
        template("funcA", TrafficDirection::Egress),
        ProgramTemplate::new("tclens", "rawB", TrafficDirection::Egress, AttachMode::RawPacket),
    ]);
    let registry = ProbeRegistry::new(
        config,
        Arc::new(catalog),
        RecordingDriver::default(),
        ProgramNames::new(),
    );
    let netns = netns_handle();

    registry
        .setup(&NetDevice::new(3, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();

    let params = registry.driver().with(|s| s.last_params.clone());
    assert_eq!(params[0].filter_handle, 1);
    assert_eq!(params[1].filter_handle, 2);
    assert!(params.iter().all(|p| p.priority == 5));
}

#[test]
fn test_registry_recovers_after_driver_panic() {
    let registry = Arc::new(two_template_registry());
    registry
        .driver()
        .with(|s| s.panic_on = Some("funcB".to_string()));

    let worker = Arc::clone(&registry);
    let result = thread::spawn(move || {
        let netns = netns_handle();
        let _ = worker.setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags());
    })
    .join();
    assert!(result.is_err());

    // funcA went in before funcB blew up under the write lock
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.resolve_device_name(7, 100), Some("eth0".to_string()));

    registry.driver().with(|s| s.panic_on = None);
    let netns = netns_handle();
    registry
        .setup(&NetDevice::new(7, 100, "eth0"), netns.as_fd(), all_flags())
        .unwrap();
    assert_eq!(registry.len(), 2);

    registry.flush_namespace(100);
    assert!(registry.is_empty());
}
