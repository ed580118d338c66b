//! Generated per-session environment file.
//!
//! Regenerated in full on every write, never patched in place. Holds the
//! compose project name and the ports of the session's slot.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::naming::slugify;
use crate::core::ports::PortPlan;
use crate::io::config::PortsConfig;
use crate::io::write_atomic;

/// Values rendered into the env file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSpec<'a> {
    pub compose_project: Option<&'a str>,
    pub port_slot: Option<u16>,
}

/// Render `KEY=VALUE` lines. Service names become `<SERVICE>_PORT`.
pub fn render(spec: &EnvSpec<'_>, ports: &PortsConfig, plan: &PortPlan) -> String {
    let mut out = String::from("# Generated by sprintboard. Do not edit.\n");
    if let Some(project) = spec.compose_project {
        out.push_str(&format!("COMPOSE_PROJECT_NAME={project}\n"));
    }
    if let Some(slot) = spec.port_slot {
        let start = *plan.slot_range(slot).start();
        out.push_str(&format!("PORT_SLOT={slot}\n"));
        out.push_str(&format!("PORT_BASE={start}\n"));
        for (service, offset) in &ports.services {
            let name = slugify(service).replace('-', "_").to_ascii_uppercase();
            out.push_str(&format!("{name}_PORT={}\n", start + u64::from(*offset)));
        }
    }
    out
}

/// Replace the env file at `path`.
pub fn write(path: &Path, spec: &EnvSpec<'_>, ports: &PortsConfig, plan: &PortPlan) -> Result<()> {
    write_atomic(path, &render(spec, ports, plan))?;
    debug!(path = %path.display(), "env file written");
    Ok(())
}

/// Delete the env file. Already gone is success.
pub fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> PortsConfig {
        let mut cfg = PortsConfig {
            enabled: true,
            ..PortsConfig::default()
        };
        cfg.services.insert("web".to_string(), 0);
        cfg.services.insert("postgres-db".to_string(), 2);
        cfg
    }

    #[test]
    fn renders_slot_ports_per_service() {
        let cfg = ports();
        let plan = PortPlan {
            base: cfg.base,
            step: cfg.step,
            max_worktrees: cfg.max_worktrees,
        };
        let spec = EnvSpec {
            compose_project: Some("sb-1-2-user-auth"),
            port_slot: Some(1),
        };
        let text = render(&spec, &cfg, &plan);
        assert!(text.contains("COMPOSE_PROJECT_NAME=sb-1-2-user-auth\n"));
        assert!(text.contains("PORT_SLOT=1\n"));
        assert!(text.contains("PORT_BASE=10210\n"));
        assert!(text.contains("WEB_PORT=10210\n"));
        assert!(text.contains("POSTGRES_DB_PORT=10212\n"));
    }

    /// A second write replaces the file; remove tolerates a missing file.
    #[test]
    fn write_regenerates_and_remove_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".env.ports");
        let cfg = ports();
        let plan = PortPlan {
            base: cfg.base,
            step: cfg.step,
            max_worktrees: cfg.max_worktrees,
        };
        let with_slot = EnvSpec {
            compose_project: None,
            port_slot: Some(2),
        };
        write(&path, &with_slot, &cfg, &plan).expect("write");
        let without_slot = EnvSpec {
            compose_project: Some("sb-x"),
            port_slot: None,
        };
        write(&path, &without_slot, &cfg, &plan).expect("rewrite");
        let text = fs::read_to_string(&path).expect("read");
        assert!(!text.contains("PORT_SLOT"));
        assert!(text.contains("COMPOSE_PROJECT_NAME=sb-x"));

        remove(&path).expect("remove");
        remove(&path).expect("remove again");
        assert!(!path.exists());
    }
}
