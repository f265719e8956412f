//! Property-based tests for the merge law, the failure state machine, and
//! alert gating.

use chrono::{Duration, Utc};
use proptest::prelude::*;
use service_monitoring::config::EngineSettings;
use service_monitoring::model::{
    merge_reports, DeviceKind, HealthFlag, HealthReport, ServiceDefinition,
};
use service_monitoring::status::StatusStore;
use uuid::Uuid;

fn checker_flag() -> impl Strategy<Value = HealthFlag> {
    prop_oneof![
        Just(HealthFlag::Healthy),
        Just(HealthFlag::Escalation),
        Just(HealthFlag::Degraded),
        Just(HealthFlag::InvalidConfiguration),
        Just(HealthFlag::Unknown),
    ]
}

fn definition(name: &str) -> ServiceDefinition {
    ServiceDefinition {
        system_monitor_id: Uuid::new_v4(),
        name: name.to_string(),
        host: "example.test".to_string(),
        port: 80,
        device: DeviceKind::WebModule,
        is_monitored: true,
        is_acknowledged: false,
        snooze_until: None,
        check_interval: "* * * * *".to_string(),
        plugins: vec![],
        agent_api_base_url: None,
        configuration: serde_json::Map::new(),
    }
}

// Property: the merged flag is exactly the worst flag by severity.
proptest! {
    #[test]
    fn prop_merge_is_worst_of_all(
        default_flag in checker_flag(),
        plugin_flags in prop::collection::vec(checker_flag(), 0..6),
    ) {
        let default = HealthReport::new(default_flag, "default");
        let plugins: Vec<HealthReport> = plugin_flags
            .iter()
            .map(|flag| HealthReport::new(*flag, "plugin"))
            .collect();
        let plugin_refs: Vec<&HealthReport> = plugins.iter().collect();

        let merged = merge_reports(&default, &plugin_refs);

        let expected = std::iter::once(default_flag)
            .chain(plugin_flags.iter().copied())
            .max_by_key(|flag| flag.severity())
            .unwrap();

        prop_assert_eq!(merged.flag.severity(), expected.severity());
    }
}

// Property: all Healthy in, Healthy out.
proptest! {
    #[test]
    fn prop_merge_all_healthy_is_healthy(plugin_count in 0usize..8) {
        let default = HealthReport::healthy();
        let plugins: Vec<HealthReport> = (0..plugin_count).map(|_| HealthReport::healthy()).collect();
        let plugin_refs: Vec<&HealthReport> = plugins.iter().collect();

        prop_assert_eq!(merge_reports(&default, &plugin_refs).flag, HealthFlag::Healthy);
    }
}

// Property: over any tick sequence, the failure count equals the length of
// the trailing non-Healthy streak, and the up-time never decreases.
proptest! {
    #[test]
    fn prop_failure_count_tracks_trailing_streak(ticks in prop::collection::vec(any::<bool>(), 1..40)) {
        let store = StatusStore::new();
        let def = definition("prop-svc");

        let mut streak = 0u32;
        let mut last_up = None;

        for healthy in ticks {
            let report = if healthy {
                HealthReport::healthy()
            } else {
                HealthReport::new(HealthFlag::Escalation, "boom")
            };

            let now = Utc::now();
            let result = store.apply_merged(&def, report, now);

            if healthy {
                streak = 0;
                prop_assert_eq!(result.failure_count, 0);
                prop_assert!(result.last_service_up_time >= last_up);
                last_up = result.last_service_up_time;
            } else {
                streak += 1;
                prop_assert_eq!(result.failure_count, streak);
                prop_assert_eq!(result.last_service_up_time, last_up);
            }
        }
    }
}

// Property: reclassification tiers hold for every failure count.
proptest! {
    #[test]
    fn prop_reclassification_tiers(failures in 1u32..20) {
        let store = StatusStore::new();
        let def = definition("tier-svc");

        let mut flag = HealthFlag::Healthy;
        for _ in 0..failures {
            flag = store
                .apply_merged(&def, HealthReport::new(HealthFlag::Escalation, "down"), Utc::now())
                .report
                .flag;
        }

        match failures {
            1..=3 => prop_assert_eq!(flag, HealthFlag::Escalation),
            _ => prop_assert_eq!(flag, HealthFlag::Degraded),
        }
    }
}

// Property: within the throttle window after an emission, the gate stays
// closed no matter how high the failure count climbs.
proptest! {
    #[test]
    fn prop_throttle_idempotence(
        extra_failures in 1u32..30,
        elapsed_secs in 0i64..299,
    ) {
        let store = StatusStore::new();
        let def = definition("throttle-svc");
        let settings = EngineSettings::default();

        let mut result = store.apply_merged(
            &def,
            HealthReport::new(HealthFlag::Escalation, "down"),
            Utc::now(),
        );
        for _ in 0..3 + extra_failures {
            result = store.apply_merged(
                &def,
                HealthReport::new(HealthFlag::Escalation, "down"),
                Utc::now(),
            );
        }

        let emitted_at = Utc::now();
        prop_assert!(store.should_emit_alert(&def, &result, &settings, emitted_at));
        store.record_alert(&def.name, emitted_at);

        // Anywhere inside the 5-minute window: suppressed.
        let probe = emitted_at + Duration::seconds(elapsed_secs);
        prop_assert!(!store.should_emit_alert(&def, &result, &settings, probe));

        // Strictly past the window: open again.
        let after = emitted_at + settings.alert_throttle + Duration::seconds(1);
        prop_assert!(store.should_emit_alert(&def, &result, &settings, after));
    }
}

// Property: the gate never opens at or below the threshold.
proptest! {
    #[test]
    fn prop_no_alert_at_or_below_threshold(failures in 1u32..4) {
        let store = StatusStore::new();
        let def = definition("gate-svc");
        let settings = EngineSettings::default();

        let mut result = store.apply_merged(
            &def,
            HealthReport::new(HealthFlag::Escalation, "down"),
            Utc::now(),
        );
        for _ in 1..failures {
            result = store.apply_merged(
                &def,
                HealthReport::new(HealthFlag::Escalation, "down"),
                Utc::now(),
            );
        }

        prop_assert!(result.failure_count <= settings.failure_threshold);
        prop_assert!(!store.should_emit_alert(&def, &result, &settings, Utc::now()));
    }
}
