use std::time::Duration;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["recipehub"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn cache_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.cache.backend, CacheBackend::Redis);
    assert_eq!(settings.cache.redis_url, DEFAULT_REDIS_URL);
    assert_eq!(settings.cache.operation_timeout, Duration::from_millis(250));
    assert_eq!(settings.cache.detail_ttl_min, Duration::from_secs(1500));
    assert_eq!(settings.cache.detail_ttl_max, Duration::from_secs(1800));
    assert_eq!(settings.cache.counter_policy, CounterPolicy::Strict);
}

#[test]
fn jobs_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.jobs.reconcile_cron, DEFAULT_RECONCILE_CRON);
    assert_eq!(settings.jobs.warm_cron, DEFAULT_WARM_CRON);
    assert_eq!(settings.jobs.warm_top_n, Some(DEFAULT_WARM_TOP_N));
    assert_eq!(settings.jobs.write_attempts.get(), 3);
    assert!(settings.jobs.bootstrap_on_start);
}

#[test]
fn warm_top_n_zero_means_all() {
    let mut raw = RawSettings::default();
    raw.jobs.warm_top_n = Some(0);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.jobs.warm_top_n, None);
}

#[test]
fn rejects_inverted_ttl_window() {
    let mut raw = RawSettings::default();
    raw.cache.detail_ttl_min_secs = Some(1800);
    raw.cache.detail_ttl_max_secs = Some(1500);

    let err = Settings::from_raw(raw).expect_err("inverted window");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.detail_ttl_max_secs",
            ..
        }
    ));
}

#[test]
fn rejects_second_long_cache_timeout() {
    let mut raw = RawSettings::default();
    raw.cache.operation_timeout_ms = Some(1500);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn rejects_invalid_cron_expression() {
    let mut raw = RawSettings::default();
    raw.jobs.reconcile_cron = Some("every fifteen minutes".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid cron");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "jobs.reconcile_cron",
            ..
        }
    ));
}

#[test]
fn rejects_unknown_backend_and_policy() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("memcached".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.cache.counter_policy = Some("lenient".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "recipehub",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--database-url",
        "postgres://override",
        "--cache-backend",
        "memory",
        "--counter-policy",
        "auto-initialize",
    ]);

    let Some(Command::Serve(serve)) = args.command else {
        panic!("wrong command parsed");
    };
    assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));

    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&serve.overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.database.url.as_deref(), Some("postgres://override"));
    assert_eq!(settings.cache.backend, CacheBackend::Memory);
    assert_eq!(settings.cache.counter_policy, CounterPolicy::AutoInitialize);
}

#[test]
fn parse_one_shot_commands() {
    for (name, expected) in [("bootstrap", 0), ("reconcile", 1), ("warm", 2)] {
        let args = CliArgs::parse_from([
            "recipehub",
            name,
            "--redis-url",
            "redis://cache:6379",
        ]);

        let (kind, one_shot) = match args.command.expect("command") {
            Command::Bootstrap(args) => (0, args),
            Command::Reconcile(args) => (1, args),
            Command::Warm(args) => (2, args),
            Command::Serve(_) => panic!("wrong command parsed"),
        };
        assert_eq!(kind, expected);
        assert_eq!(
            one_shot.connections.redis_url.as_deref(),
            Some("redis://cache:6379")
        );
    }
}
