//! Synthetic workload generator: a realistic log batch with embedded
//! anomaly phases, for exercising the pipeline end to end without a
//! cloud project.

use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::{json, Value};

/// Phase sizes for the generated batch.
#[derive(Debug, Clone, Copy)]
pub struct SimulationPlan {
    /// Healthy INFO traffic (~200ms latency).
    pub baseline: usize,
    /// Latency ramp from ~2s upward, 30% of them erroring.
    pub latency_ramp: usize,
    /// Rapid repeated authentication failures.
    pub auth_burst: usize,
    /// Resource exhaustion indicators.
    pub exhaustion: usize,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            baseline: 600,
            latency_ramp: 100,
            auth_burst: 50,
            exhaustion: 5,
        }
    }
}

/// Generate the batch, oldest first, ending near now.
pub fn generate(plan: &SimulationPlan) -> Vec<Value> {
    let mut rng = rand::thread_rng();
    let total = plan.baseline + plan.latency_ramp + plan.auth_burst + plan.exhaustion;
    let mut at = Utc::now() - Duration::seconds(total as i64);
    let mut logs = Vec::with_capacity(total);

    for i in 0..plan.baseline {
        let latency = rng.gen_range(150.0..250.0);
        logs.push(json!({
            "insertId": format!("sim{i:05}"),
            "timestamp": at.to_rfc3339(),
            "severity": "INFO",
            "resource": {
                "type": "cloudsql_database",
                "labels": {"database_id": "prod-db-1", "region": "us-central1"}
            },
            "jsonPayload": {
                "latency_ms": latency,
                "query": "SELECT * FROM users WHERE id = ?",
                "connection_id": rng.gen_range(1..50)
            },
            "textPayload": format!("Query executed successfully in {}ms", latency as i64)
        }));
        at = at + Duration::seconds(1);
    }

    for i in 0..plan.latency_ramp {
        let latency = 2000.0 + i as f64 * 30.0 + rng.gen_range(-200.0..200.0);
        let errored = rng.gen_bool(0.3);
        logs.push(json!({
            "insertId": format!("sim-ramp{i:05}"),
            "timestamp": at.to_rfc3339(),
            "severity": if errored { "ERROR" } else { "WARNING" },
            "resource": {
                "type": "cloudsql_database",
                "labels": {"database_id": "prod-db-1", "region": "us-central1"}
            },
            "jsonPayload": {
                "latency_ms": latency,
                "query": "SELECT * FROM orders JOIN users ON users.id = orders.user_id",
                "deployment_id": "v2.3.1",
                "slow_query_reason": "Missing index on orders.created_at"
            },
            "textPayload": format!("Query timeout after {}ms", latency as i64)
        }));
        at = at + Duration::seconds(1);
    }

    let suspicious_ips: Vec<String> = (0..5)
        .map(|_| format!("192.168.1.{}", rng.gen_range(100..110)))
        .collect();
    for i in 0..plan.auth_burst {
        let ip = &suspicious_ips[rng.gen_range(0..suspicious_ips.len())];
        logs.push(json!({
            "insertId": format!("sim-auth{i:05}"),
            "timestamp": at.to_rfc3339(),
            "severity": "ERROR",
            "resource": {
                "type": "cloudsql_database",
                "labels": {"database_id": "prod-db-1", "region": "us-central1"}
            },
            "textPayload": format!("Authentication failed for user 'admin' from {ip}"),
            "jsonPayload": {
                "error_code": "INVALID_PASSWORD",
                "source_ip": ip,
                "user": "admin"
            }
        }));
        at = at + Duration::seconds(1);
    }

    for i in 0..plan.exhaustion {
        logs.push(json!({
            "insertId": format!("sim-res{i:05}"),
            "timestamp": at.to_rfc3339(),
            "severity": "CRITICAL",
            "resource": {
                "type": "gce_instance",
                "labels": {"instance_id": "worker-7", "zone": "us-central1-a"}
            },
            "textPayload": "connection pool exhausted: too many connections to prod-db-1"
        }));
        at = at + Duration::seconds(1);
    }

    logs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::normalize;

    #[test]
    fn test_generated_batch_shape() {
        let plan = SimulationPlan::default();
        let logs = generate(&plan);
        assert_eq!(logs.len(), 755);

        // Every generated record normalizes cleanly.
        for log in &logs {
            normalize(log).unwrap();
        }
    }

    #[test]
    fn test_auth_burst_is_error_severity() {
        let plan = SimulationPlan {
            baseline: 0,
            latency_ramp: 0,
            auth_burst: 10,
            exhaustion: 0,
        };
        for log in generate(&plan) {
            let entry = normalize(&log).unwrap();
            assert!(entry.severity.is_error());
            assert!(entry.message.contains("Authentication failed"));
        }
    }
}
