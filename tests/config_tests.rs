use blog_counters::config::{KvBackend, StoreBackend};
use blog_counters::{CounterError, Config};

#[test]
fn test_timeout_zero_rejected() {
    let mut config = Config::default();
    config.http.timeout_secs = 0;

    let result = config.validate();
    assert!(result.is_err(), "Timeout of 0 should fail validation");
}

#[test]
fn test_timeout_bounds() {
    for (value, ok) in [(1, true), (300, true), (301, false), (u64::MAX, false)] {
        let mut config = Config::default();
        config.http.timeout_secs = value;
        assert_eq!(
            config.validate().is_ok(),
            ok,
            "timeout {} should be {}",
            value,
            if ok { "valid" } else { "invalid" }
        );
    }
}

#[test]
fn test_lock_ttl_zero_rejected() {
    let mut config = Config::default();
    config.flush.lock_ttl_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_share_window_is_valid() {
    let mut config = Config::default();
    config.dedup.share_ttl_secs = 0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation_reports_every_issue() {
    let mut config = Config::default();
    config.server.bind = "nope".to_string();
    config.http.timeout_secs = 0;
    config.logging.level = "loud".to_string();

    match config.validate() {
        Err(CounterError::ValidationError(issues)) => {
            assert_eq!(issues.len(), 3);
            let message = CounterError::ValidationError(issues).to_string();
            assert!(message.contains("server.bind"));
            assert!(message.contains("logging.level"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

// Environment variables are process-wide, so every env case runs inside this
// one test to keep them sequential.
#[test]
fn test_env_overrides() {
    let clear = || {
        for name in [
            "BLOG_COUNTERS_KV_BACKEND",
            "BLOG_COUNTERS_KV_URL",
            "BLOG_COUNTERS_KV_TOKEN",
            "BLOG_COUNTERS_STORE_URL",
            "BLOG_COUNTERS_VIEW_TTL",
            "BLOG_COUNTERS_FLUSH_EMBEDDED",
            "BLOG_COUNTERS_CRON_SECRET",
        ] {
            std::env::remove_var(name);
        }
    };
    clear();

    std::env::set_var("BLOG_COUNTERS_KV_URL", "https://eu1-demo.upstash.io");
    std::env::set_var("BLOG_COUNTERS_KV_TOKEN", "tok");
    std::env::set_var("BLOG_COUNTERS_VIEW_TTL", "60");
    std::env::set_var("BLOG_COUNTERS_FLUSH_EMBEDDED", "true");
    std::env::set_var("BLOG_COUNTERS_CRON_SECRET", "s3cret");
    let config = Config::default().merge_from_env();
    clear();

    let config = config.unwrap();
    assert_eq!(config.kv.backend, KvBackend::Upstash);
    assert_eq!(config.kv.url, "https://eu1-demo.upstash.io");
    assert_eq!(config.kv.token.as_deref(), Some("tok"));
    assert_eq!(config.dedup.view_ttl_secs, 60);
    assert!(config.flush.embedded);
    assert_eq!(config.server.cron_secret.as_deref(), Some("s3cret"));

    // An explicit backend wins over the one implied by a URL
    std::env::set_var("BLOG_COUNTERS_KV_BACKEND", "memory");
    std::env::set_var("BLOG_COUNTERS_KV_URL", "https://eu1-demo.upstash.io");
    let config = Config::default().merge_from_env();
    clear();
    assert_eq!(config.unwrap().kv.backend, KvBackend::Memory);

    for value in ["-1", "abc", "1.5", ""] {
        std::env::set_var("BLOG_COUNTERS_VIEW_TTL", value);
        let result = Config::default().merge_from_env();
        clear();
        assert!(
            result.is_err(),
            "View TTL {:?} from environment should fail to parse",
            value
        );
    }

    std::env::set_var("BLOG_COUNTERS_KV_BACKEND", "memcached");
    let result = Config::default().merge_from_env();
    clear();
    assert!(matches!(result, Err(CounterError::InvalidArgument(_))));
}

#[test]
fn test_defaults_use_in_process_backends() {
    let config = Config::default();
    assert_eq!(config.kv.backend, KvBackend::Memory);
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert!(config.server.cron_secret.is_none());
}
