// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates keel.yml template files.

use std::path::Path;

use crate::error::{Error, Result};

use super::{CONFIG_FILENAME, Config};

pub fn init_config(dir: &Path, application: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = Config::template();

    if let Some(name) = application {
        if name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "application name cannot be empty".to_string(),
            ));
        }
        config.application = name.to_string();
    }

    let yaml = generate_template_yaml(&config);
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    let first_host = config.hosts.first();
    format!(
        r#"application: {}
state_dir: {}

hosts:
  - id: {}
    address: {}
    tags: {{ role: app }}
  # Remote hosts are reached over SSH: [user@]host[:port]
  # - id: web-1
  #   address: deploy@web-1.example.com
  #   tags: {{ role: web }}
  #   trust_first_connection: false

artifacts: []
  # - id: my-app-v1
  #   hash: sha256:<digest>
  #   location: releases/my-app-v1
  #   hooks:
  #     ApplicationStop: {{ location: scripts/stop.sh, timeout: 60 }}
  #     Install: {{ location: scripts/install.sh }}
  #     ApplicationStart: {{ location: scripts/start.sh }}
  #     ValidateService: {{ location: scripts/validate.sh, timeout: 5m }}

rollout:
  batch: {}
  max_failure_ratio: {}
  auto_rollback: {}
"#,
        config.application,
        config.state_dir.display(),
        first_host.id,
        first_host.address,
        config.rollout.batch,
        config.rollout.max_failure_ratio,
        config.rollout.deploy.auto_rollback,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), Some("billing"), false).unwrap();

        let config = Config::load(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config.application, "billing");
        assert!(config.hosts.first().address.is_local());
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), None, false).unwrap();

        assert!(matches!(
            init_config(dir.path(), None, false),
            Err(Error::AlreadyExists(_))
        ));
        assert!(init_config(dir.path(), None, true).is_ok());
    }
}
