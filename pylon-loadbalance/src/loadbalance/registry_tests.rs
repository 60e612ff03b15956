#[cfg(test)]
mod tests {
    use crate::loadbalance::registry::*;
    use pylon_core::config::model::{EndpointAdmissionError, EndpointConfig};
    use pylon_core::ErrorClass;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn create_test_endpoint(name: &str, max_requests: u32) -> EndpointConfig {
        EndpointConfig::new(name, format!("https://{name}.rpc.example.com"), max_requests)
    }

    fn create_test_registry(names: &[&str]) -> EndpointRegistry {
        let endpoints: Vec<EndpointConfig> =
            names.iter().map(|n| create_test_endpoint(n, 100)).collect();
        EndpointRegistry::new(&endpoints, Duration::from_secs(5)).unwrap()
    }

    fn first_name(registry: &EndpointRegistry) -> String {
        registry.list_healthy()[0].name.clone()
    }

    #[test]
    fn test_all_endpoints_start_healthy() {
        let registry = create_test_registry(&["a", "b", "c"]);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.health_counts(), (3, 3));
        for snapshot in registry.snapshots() {
            assert_eq!(snapshot.state, CircuitState::Healthy);
            assert_eq!(snapshot.requests_this_window, 0);
            assert_eq!(snapshot.error_count, 0);
            assert!(snapshot.last_error_at.is_none());
        }
        assert_eq!(registry.list_healthy().len(), 3);
    }

    #[test]
    fn test_empty_registry_lists_nothing() {
        let registry = EndpointRegistry::new(&[], Duration::from_secs(5)).unwrap();
        assert!(registry.is_empty());
        assert!(registry.list_healthy().is_empty());
        assert_eq!(registry.health_counts(), (0, 0));
    }

    #[test]
    fn test_round_robin_fairness() {
        let registry = create_test_registry(&["a", "b", "c"]);
        let picks: Vec<String> = (0..30).map(|_| first_name(&registry)).collect();

        // 任意连续K次调用中，每个端点恰好被选中一次
        for window in picks.windows(3) {
            let mut sorted = window.to_vec();
            sorted.sort();
            assert_eq!(sorted, vec!["a", "b", "c"], "window {window:?}");
        }
    }

    #[test]
    fn test_list_healthy_rotates_full_sequence() {
        let registry = create_test_registry(&["a", "b", "c"]);

        let first: Vec<String> = registry.list_healthy().into_iter().map(|e| e.name).collect();
        let second: Vec<String> = registry.list_healthy().into_iter().map(|e| e.name).collect();

        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(second, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_mark_failure_removes_from_rotation() {
        let registry = create_test_registry(&["a", "b", "c"]);
        registry.mark_failure("b", ErrorClass::RateLimited);

        let snapshot = registry.get("b").unwrap();
        assert!(!snapshot.is_healthy());
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.last_error_class, Some(ErrorClass::RateLimited));
        assert!(snapshot.last_error_at.is_some());

        for _ in 0..10 {
            let names: Vec<String> = registry.list_healthy().into_iter().map(|e| e.name).collect();
            assert_eq!(names.len(), 2);
            assert!(!names.contains(&"b".to_string()));
        }
    }

    #[test]
    fn test_single_failure_is_enough() {
        let registry = create_test_registry(&["a"]);
        registry.mark_failure("a", ErrorClass::TransientNetwork);
        assert_eq!(registry.health_counts(), (0, 1));
    }

    #[test]
    fn test_mark_success_recovers_immediately() {
        let registry = create_test_registry(&["a", "b"]);
        registry.mark_failure("a", ErrorClass::Forbidden);
        assert!(!registry.get("a").unwrap().is_healthy());

        registry.mark_success("a", 120);

        let snapshot = registry.get("a").unwrap();
        assert!(snapshot.is_healthy());
        assert_eq!(snapshot.requests_this_window, 1);
        // 错误计数不会因恢复而清零
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_latency_smoothing() {
        let registry = create_test_registry(&["a"]);

        registry.mark_success("a", 100);
        assert_eq!(registry.get("a").unwrap().average_latency_ms, 100);

        registry.mark_success("a", 50);
        assert_eq!(registry.get("a").unwrap().average_latency_ms, 75);

        registry.mark_success("a", 25);
        assert_eq!(registry.get("a").unwrap().average_latency_ms, 50);
    }

    #[test]
    fn test_window_ceiling_excludes_endpoint() {
        let endpoints = vec![create_test_endpoint("a", 2), create_test_endpoint("b", 100)];
        let registry = EndpointRegistry::new(&endpoints, Duration::from_secs(5)).unwrap();

        registry.mark_success("a", 10);
        registry.mark_success("a", 10);

        for _ in 0..5 {
            let names: Vec<String> = registry.list_healthy().into_iter().map(|e| e.name).collect();
            assert_eq!(names, vec!["b"]);
        }
        // 达到上限不影响健康状态
        assert!(registry.get("a").unwrap().is_healthy());
    }

    #[test]
    fn test_fallback_to_least_loaded_when_none_eligible() {
        let registry = create_test_registry(&["a", "b", "c"]);
        registry.mark_success("a", 10);
        registry.mark_success("a", 10);
        registry.mark_success("c", 10);
        for name in ["a", "b", "c"] {
            registry.mark_failure(name, ErrorClass::TransientNetwork);
        }

        let candidates = registry.list_healthy();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "b");
    }

    #[test]
    fn test_fallback_rotates_among_least_loaded() {
        let registry = create_test_registry(&["a", "b", "c"]);
        for name in ["a", "b", "c"] {
            registry.mark_failure(name, ErrorClass::TransientNetwork);
        }

        let picks: Vec<String> = (0..4).map(|_| first_name(&registry)).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_reset_window_counters() {
        let registry = create_test_registry(&["a", "b"]);
        registry.mark_success("a", 10);
        registry.mark_success("a", 10);
        registry.mark_success("b", 10);
        registry.mark_failure("b", ErrorClass::RateLimited);

        registry.reset_window_counters();

        let a = registry.get("a").unwrap();
        let b = registry.get("b").unwrap();
        assert_eq!(a.requests_this_window, 0);
        assert_eq!(b.requests_this_window, 0);
        // 健康状态与错误计数保持不变
        assert!(a.is_healthy());
        assert!(!b.is_healthy());
        assert_eq!(b.error_count, 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let endpoints = vec![create_test_endpoint("a", u32::MAX)];
        let registry = Arc::new(EndpointRegistry::new(&endpoints, Duration::from_secs(5)).unwrap());
        let threads = 8;
        let per_thread = 250;

        let run_phase = |count: usize| {
            let barrier = Arc::new(Barrier::new(threads));
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        for _ in 0..count {
                            registry.mark_success("a", 1);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        };

        run_phase(per_thread);
        assert_eq!(
            registry.get("a").unwrap().requests_this_window,
            (threads * per_thread) as u32
        );

        registry.reset_window_counters();
        assert_eq!(registry.get("a").unwrap().requests_this_window, 0);

        // 重置完成之后发出的成功全部被计数
        run_phase(per_thread / 2);
        assert_eq!(
            registry.get("a").unwrap().requests_this_window,
            (threads * per_thread / 2) as u32
        );
    }

    #[test]
    fn test_reset_racing_with_increments() {
        let endpoints = vec![create_test_endpoint("a", u32::MAX)];
        let registry = Arc::new(EndpointRegistry::new(&endpoints, Duration::from_secs(5)).unwrap());
        let threads = 4;
        let per_thread = 2000;
        let barrier = Arc::new(Barrier::new(threads + 1));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..per_thread {
                        registry.mark_success("a", 1);
                    }
                })
            })
            .collect();

        barrier.wait();
        registry.reset_window_counters();
        for handle in handles {
            handle.join().unwrap();
        }

        let after_race = registry.get("a").unwrap().requests_this_window;
        assert!(after_race <= (threads * per_thread) as u32);

        // 竞争结束后再次重置，后续计数精确
        registry.reset_window_counters();
        for _ in 0..17 {
            registry.mark_success("a", 1);
        }
        assert_eq!(registry.get("a").unwrap().requests_this_window, 17);
    }

    #[test]
    fn test_unknown_endpoint_is_ignored() {
        let registry = create_test_registry(&["a"]);
        registry.mark_success("missing", 10);
        registry.mark_failure("missing", ErrorClass::Other);
        assert_eq!(registry.health_counts(), (1, 1));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_add_endpoint_admits_public_https() {
        let registry = create_test_registry(&["a"]);

        let snapshot = registry
            .add_endpoint(EndpointConfig::new("discovered", "https://rpc.ankr.com/solana", 50))
            .unwrap();
        assert_eq!(snapshot.name, "discovered");
        assert!(snapshot.is_healthy());

        assert_eq!(registry.len(), 2);
        let names: Vec<String> = registry.list_healthy().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"discovered".to_string()));
    }

    #[test]
    fn test_add_endpoint_rejections() {
        let registry = create_test_registry(&["a"]);

        assert_eq!(
            registry.add_endpoint(EndpointConfig::new("a", "https://other.example.com", 10)),
            Err(EndpointAdmissionError::DuplicateName("a".to_string()))
        );
        assert_eq!(
            registry.add_endpoint(EndpointConfig::new("dup", "https://a.rpc.example.com/", 10)),
            Err(EndpointAdmissionError::DuplicateUrl(
                "https://a.rpc.example.com/".to_string()
            ))
        );
        assert!(matches!(
            registry.add_endpoint(EndpointConfig::new("plain", "http://rpc.example.com", 10)),
            Err(EndpointAdmissionError::InsecureScheme(_))
        ));
        assert!(matches!(
            registry.add_endpoint(EndpointConfig::new("local", "https://127.0.0.1:8899", 10)),
            Err(EndpointAdmissionError::PrivateAddress(_))
        ));
        assert!(matches!(
            registry.add_endpoint(EndpointConfig::new("lan", "https://192.168.0.5", 10)),
            Err(EndpointAdmissionError::PrivateAddress(_))
        ));
        assert_eq!(
            registry.add_endpoint(EndpointConfig::new("zero", "https://zero.example.com", 0)),
            Err(EndpointAdmissionError::InvalidLimit("zero".to_string()))
        );
        assert_eq!(
            registry.add_endpoint(EndpointConfig::new("  ", "https://blank.example.com", 10)),
            Err(EndpointAdmissionError::EmptyName)
        );
        assert!(matches!(
            registry.add_endpoint(EndpointConfig::new("bad", "not-a-url", 10)),
            Err(EndpointAdmissionError::InvalidUrl { .. })
        ));

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_endpoint_dedups_normalized_urls() {
        let registry = create_test_registry(&["a"]);

        // 主机大小写与默认端口不影响去重
        let upper = EndpointConfig::new("upper", "https://A.RPC.example.com:443", 10);
        assert_eq!(
            registry.add_endpoint(upper),
            Err(EndpointAdmissionError::DuplicateUrl(
                "https://A.RPC.example.com:443".to_string()
            ))
        );

        let snapshot = registry
            .add_endpoint(EndpointConfig::new("mixed", "https://Mixed.Example.ORG:443/", 10))
            .unwrap();
        assert_eq!(snapshot.url, "https://mixed.example.org");
        assert_eq!(
            registry.add_endpoint(EndpointConfig::new("again", "https://mixed.example.org", 10)),
            Err(EndpointAdmissionError::DuplicateUrl(
                "https://mixed.example.org".to_string()
            ))
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_health_status_report() {
        let registry = create_test_registry(&["a", "b", "c"]);
        registry.mark_success("a", 40);
        registry.mark_failure("b", ErrorClass::RateLimited);

        let status = registry.get_health_status();
        assert_eq!(status.total_endpoints, 3);
        assert_eq!(status.total_healthy, 2);

        let a = status.endpoints.iter().find(|e| e.name == "a").unwrap();
        assert!(a.is_healthy);
        assert_eq!(a.request_count, 1);
        assert_eq!(a.avg_response_time_ms, 40);
        assert_eq!(a.url, "https://a.rpc.example.com");

        let b = status.endpoints.iter().find(|e| e.name == "b").unwrap();
        assert!(!b.is_healthy);
        assert_eq!(b.error_count, 1);
        assert_eq!(b.last_error_class, Some(ErrorClass::RateLimited));
    }

    #[test]
    fn test_handles_carry_client_for_endpoint() {
        let registry = create_test_registry(&["a", "b"]);
        let handles = registry.handles();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].client.url(), "https://a.rpc.example.com");
        assert_eq!(handles[1].url, "https://b.rpc.example.com");
    }
}
