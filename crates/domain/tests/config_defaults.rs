use solace_domain::config::{BacklogPolicy, Config, SpeechStrategy, StoreBackend, TierPolicy};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn empty_file_yields_full_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.context.window, 10);
    assert_eq!(config.summarizer.min_assistant_turns, 4);
    assert_eq!(config.reaper.idle_threshold_secs, 3_600);
    assert_eq!(config.reply.speech, SpeechStrategy::Lazy);
    assert_eq!(config.reply.tier_policy, TierPolicy::WordCount);
    assert_eq!(config.dispatch.backlog, BacklogPolicy::Recover);
    assert_eq!(config.crisis.default_hotline, "988");
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn full_deployment_file_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080

[store]
backend = "supabase"
url = "https://demo.supabase.co"

[dispatch]
backlog = "ignore_stale"
workers = 4

[reply]
speech = "eager"
tier_policy = "sentence_count"
public_base_url = "https://api.example.org"

[speech.tts]
default_voice_id = "21m00Tcm4TlvDq8ikWAM"

[crisis]
keyword_safety_net = false
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.store.backend, StoreBackend::Supabase);
    assert_eq!(config.dispatch.backlog, BacklogPolicy::IgnoreStale);
    assert_eq!(config.dispatch.workers, 4);
    assert_eq!(config.reply.speech, SpeechStrategy::Eager);
    assert_eq!(
        config.speech.tts.default_voice_id.as_deref(),
        Some("21m00Tcm4TlvDq8ikWAM")
    );
    assert!(!config.crisis.keyword_safety_net);
    assert!(config.validate().is_empty(), "{:?}", config.validate());
}

#[test]
fn config_roundtrips_through_toml() {
    let config = Config::default();
    let raw = toml::to_string_pretty(&config).unwrap();
    let back: Config = toml::from_str(&raw).unwrap();
    assert_eq!(back.reply.fast.model, config.reply.fast.model);
    assert_eq!(back.llm.providers.len(), config.llm.providers.len());
}
