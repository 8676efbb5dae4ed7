//! Leader Domain Reconciliation
//!
//! Keeps a DNS name pointing at the leader: when the name does not
//! resolve to this node's address, the configured switch commands are
//! run to rebind it.

use std::net::IpAddr;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::system;

/// Leader domain and the commands that rebind it
#[derive(Debug, Clone, Default)]
pub struct DomainSettings {
    pub leader_domain: String,
    /// Templates with `{domain}` and `{ip}` placeholders
    pub switch_domain_commands: Vec<String>,
}

impl DomainSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            leader_domain: config.leader_domain.clone(),
            switch_domain_commands: config.switch_domain_commands.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.leader_domain.is_empty()
    }
}

/// Whether the domain must be rebound to `local_ip`
pub fn needs_rebind(local_ip: &str, resolved: Option<&[IpAddr]>) -> bool {
    match resolved {
        Some([first, ..]) => first.to_string() != local_ip,
        _ => true,
    }
}

/// Fill a switch command template
pub fn render_switch_command(template: &str, domain: &str, ip: &str) -> String {
    template.replace("{domain}", domain).replace("{ip}", ip)
}

/// Rebind the leader domain to this node if it points elsewhere
///
/// Returns whether the switch commands ran. Address discovery failures
/// are logged and skip this round.
pub async fn reconcile_leader_domain(settings: &DomainSettings) -> Result<bool> {
    if !settings.is_configured() {
        return Ok(false);
    }
    if settings.switch_domain_commands.is_empty() {
        tracing::error!("leader_domain is set but switch_domain_commands is empty");
        return Ok(false);
    }

    let local_ip = match system::local_ipv4() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            tracing::error!("Leader domain check could not find the local address: {}", e);
            return Ok(false);
        }
    };

    let resolved = match system::lookup_host(&settings.leader_domain).await {
        Ok(addrs) => Some(addrs),
        Err(e) => {
            tracing::warn!("Leader domain {} does not resolve: {}", settings.leader_domain, e);
            None
        }
    };

    if !needs_rebind(&local_ip, resolved.as_deref()) {
        tracing::trace!("Leader domain {} already points at {}", settings.leader_domain, local_ip);
        return Ok(false);
    }

    tracing::info!("Rebinding leader domain {} to {}", settings.leader_domain, local_ip);
    for template in settings.switch_domain_commands.iter().filter(|c| !c.is_empty()) {
        let command = render_switch_command(template, &settings.leader_domain, &local_ip);
        system::run_command_output(&command, &[]).await.map_err(|e| {
            tracing::error!("Switch domain command failed: {}", e);
            e
        })?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tempfile::tempdir;

    #[test]
    fn test_needs_rebind() {
        let here: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let there: IpAddr = Ipv4Addr::new(10, 0, 0, 2).into();

        assert!(!needs_rebind("10.0.0.1", Some(&[here, there])));
        assert!(needs_rebind("10.0.0.1", Some(&[there, here])));
        assert!(needs_rebind("10.0.0.1", Some(&[])));
        assert!(needs_rebind("10.0.0.1", None));
    }

    #[test]
    fn test_render_switch_command() {
        assert_eq!(
            render_switch_command("dns-set {domain} A {ip} # {domain}", "leader.db", "10.0.0.9"),
            "dns-set leader.db A 10.0.0.9 # leader.db"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_domain_is_noop() {
        let settings = DomainSettings::default();
        assert!(!reconcile_leader_domain(&settings).await.unwrap());

        let no_commands = DomainSettings {
            leader_domain: "leader.invalid".into(),
            switch_domain_commands: Vec::new(),
        };
        assert!(!reconcile_leader_domain(&no_commands).await.unwrap());
    }

    #[tokio::test]
    async fn test_unresolvable_domain_is_rebound() {
        let Ok(local) = system::local_ipv4() else {
            return;
        };
        let dir = tempdir().unwrap();
        let out = dir.path().join("switched");

        let settings = DomainSettings {
            leader_domain: "leader.invalid".into(),
            switch_domain_commands: vec![
                String::new(),
                format!("echo {{domain}} {{ip}} > {}", out.display()),
            ],
        };

        assert!(reconcile_leader_domain(&settings).await.unwrap());
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), format!("leader.invalid {}", local));
    }
}
