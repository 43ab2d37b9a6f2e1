//! Glances payload normalization.
//!
//! The wire format is owned by the machines and drifts between Glances
//! versions: sections go missing, lists turn into placeholder strings,
//! uptime is sometimes a number and sometimes "30 days, 17:37:37". This
//! module is the only place that touches that shape, for both the pull and
//! push paths. The transform is total - malformed input degrades to absent
//! fields, never to an error.

use serde_json::Value;

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Canonical fields extracted from one raw Glances report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryReport {
    pub hostname: String,
    pub cpu_percent: Option<f64>,
    pub cpu_user: Option<f64>,
    pub cpu_system: Option<f64>,
    pub cpu_iowait: Option<f64>,
    pub cpu_count: Option<i64>,
    pub memory_percent: Option<f64>,
    /// GiB
    pub memory_used: Option<f64>,
    /// GiB
    pub memory_total: Option<f64>,
    pub swap_percent: Option<f64>,
    pub swap_used: Option<f64>,
    pub swap_total: Option<f64>,
    pub swap_free: Option<f64>,
    /// Seconds; 0 when missing or unparseable.
    pub uptime: i64,
    pub load_avg: Option<f64>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub battery_percent: Option<f64>,
    pub battery_status: Option<String>,
    /// Opaque blobs kept verbatim for downstream consumers.
    pub sensors: Option<Value>,
    pub alerts: Option<Value>,
    pub network: Option<Value>,
    pub fs: Option<Value>,
}

/// Normalizes one raw Glances report. Never fails.
pub fn parse_report(raw: &Value) -> TelemetryReport {
    let mut report = TelemetryReport {
        hostname: "unknown".to_string(),
        ..TelemetryReport::default()
    };

    // Hostname lives under `system` in recent Glances, at the root in older ones.
    if let Some(system) = raw.get("system").and_then(Value::as_object) {
        if let Some(h) = system.get("hostname").and_then(Value::as_str) {
            report.hostname = h.to_string();
        }
        report.os_name = system.get("os_name").and_then(Value::as_str).map(str::to_string);
        report.os_version = system
            .get("os_version")
            .and_then(Value::as_str)
            .map(str::to_string);
    } else if let Some(h) = raw.get("hostname").and_then(Value::as_str) {
        report.hostname = h.to_string();
    }

    if let Some(cpu) = raw.get("cpu").and_then(Value::as_object) {
        report.cpu_percent = cpu.get("total").and_then(Value::as_f64);
        report.cpu_user = cpu.get("user").and_then(Value::as_f64);
        report.cpu_system = cpu.get("system").and_then(Value::as_f64);
        report.cpu_iowait = cpu.get("iowait").and_then(Value::as_f64);
        // `cpucore` is a per-core list on some versions, a plain count on others.
        report.cpu_count = match cpu.get("cpucore") {
            Some(Value::Array(cores)) => Some(cores.len() as i64),
            Some(Value::Object(cores)) => Some(cores.len() as i64),
            Some(v) => v.as_i64(),
            None => None,
        };
    }

    if let Some(mem) = raw.get("mem").and_then(Value::as_object) {
        report.memory_percent = mem.get("percent").and_then(Value::as_f64);
        report.memory_used = mem.get("used").and_then(Value::as_f64).map(bytes_to_gib);
        report.memory_total = mem.get("total").and_then(Value::as_f64).map(bytes_to_gib);
    }

    if let Some(swap) = raw.get("memswap").and_then(Value::as_object) {
        report.swap_percent = swap.get("percent").and_then(Value::as_f64);
        report.swap_used = swap.get("used").and_then(Value::as_f64).map(bytes_to_gib);
        report.swap_total = swap.get("total").and_then(Value::as_f64).map(bytes_to_gib);
        report.swap_free = swap.get("free").and_then(Value::as_f64).map(bytes_to_gib);
    }

    report.uptime = match raw.get("uptime") {
        Some(Value::String(s)) => parse_uptime_string(s),
        Some(v) => v.as_f64().map(|n| n as i64).unwrap_or(0),
        None => 0,
    };

    if let Some(load) = raw.get("load").and_then(Value::as_object) {
        report.load_avg = load.get("min1").and_then(Value::as_f64);
    }

    // Battery shows up as a labelled entry in the sensors list; first match wins.
    if let Some(sensors) = raw.get("sensors").and_then(Value::as_array) {
        for sensor in sensors {
            if sensor.get("label").and_then(Value::as_str) == Some("Battery") {
                report.battery_percent = sensor.get("value").and_then(coerce_f64);
                report.battery_status = sensor.get("status").and_then(coerce_string);
                break;
            }
        }
    }

    if raw.get("fs").map(Value::is_array).unwrap_or(false) {
        report.fs = raw.get("fs").cloned();
    }

    // Kept verbatim whatever their type: Glances reports string placeholders
    // like "Not available" where a list is expected.
    report.sensors = raw.get("sensors").cloned();
    report.alerts = raw.get("alert").cloned();
    report.network = raw.get("network").cloned();

    report
}

fn bytes_to_gib(bytes: f64) -> f64 {
    bytes / BYTES_PER_GIB
}

fn coerce_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite())
}

fn coerce_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Glances formats uptime as e.g. "30 days, 17:37:37". The day count and the
/// H:MM:SS clock are extracted independently; whatever matches neither
/// pattern counts as zero.
fn parse_uptime_string(raw: &str) -> i64 {
    let words: Vec<&str> = raw.split_whitespace().collect();

    let mut days = 0i64;
    for (i, word) in words.iter().enumerate() {
        let bare = word.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if (bare == "day" || bare == "days") && i > 0 {
            days = words[i - 1]
                .trim_matches(|c: char| !c.is_ascii_digit())
                .parse()
                .unwrap_or(0);
            break;
        }
    }

    let mut clock = 0i64;
    for word in &words {
        let parts: Vec<&str> = word.trim_matches(',').split(':').collect();
        if parts.len() == 3 {
            if let (Ok(h), Ok(m), Ok(s)) = (
                parts[0].parse::<i64>(),
                parts[1].parse::<i64>(),
                parts[2].parse::<i64>(),
            ) {
                clock = h * 3600 + m * 60 + s;
                break;
            }
        }
    }

    days * 86400 + clock
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_degrades_to_absent_fields() {
        let report = parse_report(&json!({}));
        assert_eq!(report.hostname, "unknown");
        assert_eq!(report.cpu_percent, None);
        assert_eq!(report.memory_used, None);
        assert_eq!(report.uptime, 0);
        assert_eq!(report.battery_percent, None);
        assert_eq!(report.sensors, None);
    }

    #[test]
    fn wrong_types_never_panic() {
        let report = parse_report(&json!({
            "system": "not an object",
            "cpu": 42,
            "mem": [1, 2, 3],
            "memswap": null,
            "uptime": {"weird": true},
            "load": "high",
            "sensors": 7,
            "fs": "Not available",
        }));
        assert_eq!(report.hostname, "unknown");
        assert_eq!(report.cpu_percent, None);
        assert_eq!(report.uptime, 0);
        // fs is only kept when it is a list...
        assert_eq!(report.fs, None);
        // ...but the generic blobs are kept whatever their type.
        assert_eq!(report.sensors, Some(json!(7)));
    }

    #[test]
    fn hostname_prefers_system_section() {
        let report = parse_report(&json!({
            "hostname": "root-level",
            "system": {"hostname": "nested"},
        }));
        assert_eq!(report.hostname, "nested");

        let report = parse_report(&json!({"hostname": "root-level"}));
        assert_eq!(report.hostname, "root-level");
    }

    #[test]
    fn uptime_string_with_days_and_clock() {
        assert_eq!(parse_uptime_string("30 days, 17:37:37"), 2_655_457);
        assert_eq!(parse_uptime_string("1 day, 2:03:04"), 93_784);
        assert_eq!(parse_uptime_string("17:37:37"), 63_457);
        assert_eq!(parse_uptime_string("3 days"), 259_200);
        assert_eq!(parse_uptime_string("up and running"), 0);
    }

    #[test]
    fn uptime_numeric_and_missing() {
        assert_eq!(parse_report(&json!({"uptime": 5})).uptime, 5);
        assert_eq!(parse_report(&json!({"uptime": 120.9})).uptime, 120);
        assert_eq!(parse_report(&json!({})).uptime, 0);
        assert_eq!(parse_report(&json!({"uptime": "garbage"})).uptime, 0);
    }

    #[test]
    fn cpucore_list_or_integer() {
        let report = parse_report(&json!({"cpu": {"cpucore": [0, 1, 2, 3, 4, 5, 6, 7]}}));
        assert_eq!(report.cpu_count, Some(8));

        let report = parse_report(&json!({"cpu": {"cpucore": 4}}));
        assert_eq!(report.cpu_count, Some(4));
    }

    #[test]
    fn memory_bytes_convert_to_gib() {
        let report = parse_report(&json!({"mem": {"used": 8_589_934_592u64, "percent": 51.3}}));
        assert_eq!(report.memory_used, Some(8.0));
        assert_eq!(report.memory_percent, Some(51.3));

        let report = parse_report(&json!({"memswap": {"total": 2_147_483_648u64}}));
        assert_eq!(report.swap_total, Some(2.0));
    }

    #[test]
    fn battery_first_match_wins() {
        let report = parse_report(&json!({
            "sensors": [
                {"label": "CPU temp", "value": 62},
                {"label": "Battery", "value": "84", "status": "Discharging"},
                {"label": "Battery", "value": 12, "status": "Critical"},
            ]
        }));
        assert_eq!(report.battery_percent, Some(84.0));
        assert_eq!(report.battery_status.as_deref(), Some("Discharging"));
        // The full sensors list is still kept verbatim.
        assert!(report.sensors.unwrap().is_array());
    }

    #[test]
    fn string_placeholder_blobs_are_preserved() {
        let report = parse_report(&json!({
            "sensors": "Not available",
            "alert": "Not available",
            "network": [{"interface_name": "eth0"}],
            "fs": [{"mnt_point": "/", "size": 1000}],
        }));
        assert_eq!(report.sensors, Some(json!("Not available")));
        assert_eq!(report.alerts, Some(json!("Not available")));
        assert!(report.network.unwrap().is_array());
        assert!(report.fs.unwrap().is_array());
    }

    #[test]
    fn full_report_extracts_everything() {
        let report = parse_report(&json!({
            "system": {"hostname": "atlas", "os_name": "Linux", "os_version": "6.8"},
            "cpu": {"total": 23.5, "user": 11.0, "system": 4.2, "iowait": 0.3, "cpucore": 8},
            "mem": {"percent": 42.0, "used": 4_294_967_296u64, "total": 17_179_869_184u64},
            "memswap": {"percent": 1.5, "used": 0, "total": 2_147_483_648u64, "free": 2_147_483_648u64},
            "uptime": "2 days, 1:00:30",
            "load": {"min1": 0.42, "min5": 0.40},
        }));
        assert_eq!(report.hostname, "atlas");
        assert_eq!(report.os_name.as_deref(), Some("Linux"));
        assert_eq!(report.cpu_percent, Some(23.5));
        assert_eq!(report.cpu_count, Some(8));
        assert_eq!(report.memory_used, Some(4.0));
        assert_eq!(report.memory_total, Some(16.0));
        assert_eq!(report.swap_free, Some(2.0));
        assert_eq!(report.uptime, 2 * 86400 + 3630);
        assert_eq!(report.load_avg, Some(0.42));
    }
}
