use clap::Parser;
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Device scripts to convert
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,
    /// TOML converter config
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Canonical script root
    #[arg(long)]
    pub script_root: Option<PathBuf>,
    /// Version substituted for the placeholder in include paths
    #[arg(long = "version-string")]
    pub version_string: Option<String>,
    /// Conversion registry file
    #[arg(long)]
    pub registry: Option<PathBuf>,
    /// Re-convert includes even when the registry says they are current
    #[arg(long)]
    pub force: bool,
    /// Treat unparsable conditions as errors
    #[arg(long)]
    pub strict_conditions: bool,
    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(root) = &self.script_root {
            config.script_root = root.clone();
        }
        if let Some(version) = &self.version_string {
            config.version = version.clone();
        }
        if let Some(registry) = &self.registry {
            config.registry_path = registry.clone();
        }
        config.force |= self.force;
        config.strict_conditions |= self.strict_conditions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "scriptconv",
            "-o",
            "out",
            "--version-string",
            "7.6",
            "--force",
            "a.txt",
            "b.txt",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(cli.inputs, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(config.version, "7.6");
        assert!(config.force);
        assert!(!config.strict_conditions);
        assert_eq!(config.registry_path, Config::default().registry_path);
    }
}
