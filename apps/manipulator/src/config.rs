use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id_prefix: String,
    pub ports: Vec<String>,
    pub phase_timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker_host: "localhost".into(),
            broker_port: 1883,
            client_id_prefix: "manipulator".into(),
            ports: vec!["s1".into(), "s2".into()],
            phase_timeout_ms: None,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("manipulator.toml") {
        apply_file_config(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file_config(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("broker_host").and_then(|v| v.as_str()) {
        settings.broker_host = v.to_string();
    }
    if let Some(v) = file_cfg.get("broker_port").and_then(|v| v.as_integer()) {
        if let Ok(port) = u16::try_from(v) {
            settings.broker_port = port;
        }
    }
    if let Some(v) = file_cfg.get("client_id_prefix").and_then(|v| v.as_str()) {
        settings.client_id_prefix = v.to_string();
    }
    if let Some(v) = file_cfg.get("ports").and_then(|v| v.as_array()) {
        let ports: Vec<String> = v
            .iter()
            .filter_map(|p| p.as_str().map(str::to_string))
            .collect();
        if !ports.is_empty() {
            settings.ports = ports;
        }
    }
    if let Some(v) = file_cfg.get("phase_timeout_ms").and_then(|v| v.as_integer()) {
        if let Ok(ms) = u64::try_from(v) {
            settings.phase_timeout_ms = Some(ms);
        }
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("MANIPULATOR__BROKER_HOST") {
        settings.broker_host = v;
    }
    if let Some(v) = var("MANIPULATOR__BROKER_PORT") {
        if let Ok(port) = v.parse::<u16>() {
            settings.broker_port = port;
        }
    }
    if let Some(v) = var("MANIPULATOR__CLIENT_ID_PREFIX") {
        settings.client_id_prefix = v;
    }
    if let Some(v) = var("MANIPULATOR__PORTS") {
        let ports: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if !ports.is_empty() {
            settings.ports = ports;
        }
    }
    if let Some(v) = var("MANIPULATOR__PHASE_TIMEOUT_MS") {
        if let Ok(ms) = v.parse::<u64>() {
            settings.phase_timeout_ms = Some(ms);
        }
    }
}
