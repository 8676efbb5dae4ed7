//! Consensus Cluster Status Check

use crate::health::HealthStatus;
use crate::system;

/// Why the cluster needs attention, if it does
pub fn cluster_alert(health: &HealthStatus, expected_members: usize) -> Option<String> {
    if let Some(error) = &health.error {
        return Some(format!("consensus cluster health test: {}", error));
    }
    if !health.healthy {
        return Some("consensus node is not healthy".to_string());
    }

    let healthy_members = health
        .consensus
        .as_ref()
        .map(|c| c.healthy_members.len())
        .unwrap_or(0);
    if healthy_members != expected_members {
        return Some(format!(
            "consensus cluster has {} healthy members, expected {}",
            healthy_members, expected_members
        ));
    }
    None
}

/// Fill the alert command template
pub fn render_alert(template: &str, message: &str) -> String {
    template.replace("{msg}", message)
}

/// Run the alert command for a cluster problem
///
/// `node_info` prefixes the message so the receiver knows which node saw it.
pub async fn raise_alert(template: &str, node_info: &str, reason: &str) {
    let message = format!("{} {}", node_info, reason);
    tracing::error!("{}", message);

    if template.is_empty() {
        tracing::error!("{} cluster_status_alert_command is not set", node_info);
        return;
    }

    let command = render_alert(template, &message);
    if let Err(e) = system::run_command_no_output(&command).await {
        tracing::error!("Cluster status alert command failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ConsensusStatus;
    use tempfile::tempdir;

    fn healthy_with(members: usize) -> HealthStatus {
        HealthStatus {
            healthy: true,
            consensus: Some(ConsensusStatus {
                healthy_members: (0..members).map(|i| format!("10.0.0.{}:10008", i)).collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_cluster_alert() {
        assert_eq!(cluster_alert(&healthy_with(3), 3), None);
        assert!(cluster_alert(&healthy_with(2), 3).unwrap().contains("2 healthy members"));

        let unhealthy = HealthStatus::default();
        assert_eq!(cluster_alert(&unhealthy, 3).unwrap(), "consensus node is not healthy");

        let failed = HealthStatus {
            error: Some("store unreachable".into()),
            ..healthy_with(3)
        };
        assert!(cluster_alert(&failed, 3).unwrap().contains("store unreachable"));
    }

    #[tokio::test]
    async fn test_raise_alert_runs_command() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("alert");
        let template = format!("echo '{{msg}}' > {}", out.display());

        raise_alert(&template, "10.0.0.1:10008", "consensus node is not healthy").await;

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "10.0.0.1:10008 consensus node is not healthy");
    }
}
