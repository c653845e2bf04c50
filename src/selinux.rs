// SELinux policy module granting systemd-sleep access to the swap file
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::defaults;
use crate::helpers::{force_remove, makedirs, run_cmd_capture, run_cmd_output, write_file};
use crate::warning::Warning;
use crate::{debug, info};

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Helper error: {0}")]
    Helper(#[from] crate::helpers::HelperError),
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },
}

pub type Result<T> = std::result::Result<T, PolicyError>;

/// Result of registering a file-context rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileContext {
    Added,
    AlreadyDefined,
}

/// SELinux policy toolchain and label store
pub trait PolicyToolchain {
    /// Type-enforcement source → loadable module
    fn compile(&self, source: &Path, module_out: &Path) -> Result<()>;
    /// Module → installable policy package
    fn package(&self, module: &Path, package_out: &Path) -> Result<()>;
    /// Install or replace a package in the running policy store
    fn install(&self, package: &Path) -> Result<()>;
    fn installed_modules(&self) -> Result<Vec<String>>;
    fn add_file_context(&self, spec: &str, selinux_type: &str) -> Result<FileContext>;
    /// Re-apply labels recursively
    fn restore_labels(&self, path: &Path) -> Result<()>;
}

/// The policy toolchain shipped with policycoreutils and checkpolicy
#[derive(Debug, Default)]
pub struct SelinuxTools;

fn checked(tool: &str, cmd: &[&str]) -> Result<()> {
    let output = run_cmd_capture(cmd)?;
    if output.success {
        Ok(())
    } else {
        Err(PolicyError::Tool {
            tool: tool.to_string(),
            message: output.text().trim().to_string(),
        })
    }
}

impl PolicyToolchain for SelinuxTools {
    fn compile(&self, source: &Path, module_out: &Path) -> Result<()> {
        checked(
            "checkmodule",
            &[
                "checkmodule",
                "-M",
                "-m",
                "-o",
                &module_out.to_string_lossy(),
                &source.to_string_lossy(),
            ],
        )
    }

    fn package(&self, module: &Path, package_out: &Path) -> Result<()> {
        checked(
            "semodule_package",
            &[
                "semodule_package",
                "-o",
                &package_out.to_string_lossy(),
                "-m",
                &module.to_string_lossy(),
            ],
        )
    }

    fn install(&self, package: &Path) -> Result<()> {
        checked("semodule", &["semodule", "-i", &package.to_string_lossy()])
    }

    fn installed_modules(&self) -> Result<Vec<String>> {
        let output = run_cmd_output(&["semodule", "-l"])?;
        Ok(parse_module_list(&output))
    }

    fn add_file_context(&self, spec: &str, selinux_type: &str) -> Result<FileContext> {
        let output = run_cmd_capture(&["semanage", "fcontext", "-a", "-t", selinux_type, spec])?;
        if output.success {
            return Ok(FileContext::Added);
        }
        if output.text().contains("already defined") {
            return Ok(FileContext::AlreadyDefined);
        }
        Err(PolicyError::Tool {
            tool: "semanage".to_string(),
            message: output.stderr,
        })
    }

    fn restore_labels(&self, path: &Path) -> Result<()> {
        checked("restorecon", &["restorecon", "-RF", &path.to_string_lossy()])
    }
}

/// `semodule -l` prints one module per line, older versions add a version column
pub fn parse_module_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `semanage fcontext` takes a regular expression; the directory part is matched literally
pub fn file_context_spec(dir: &Path) -> String {
    let mut spec = String::new();
    for c in dir.to_string_lossy().chars() {
        if "\\.^$|?*+()[]{}".contains(c) {
            spec.push('\\');
        }
        spec.push(c);
    }
    spec.push_str("(/.*)?");
    spec
}

/// A rendered type-enforcement module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyModule {
    pub name: String,
    pub source: String,
}

/// Intermediate files of one build, all regenerable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyArtifacts {
    pub source: PathBuf,
    pub module: PathBuf,
    pub package: PathBuf,
}

impl PolicyModule {
    /// Minimal grant: logind may traverse the swap directory, systemd-sleep may
    /// traverse it and do I/O on the swap file. Nothing else.
    pub fn render(name: &str) -> Self {
        let t = defaults::SWAPFILE_SELINUX_TYPE;
        let source = format!(
            "module {name} 1.0;

require {{
\ttype systemd_logind_t;
\ttype systemd_sleep_t;
\ttype {t};
\tclass dir search;
\tclass file {{ getattr ioctl lock open read write }};
}}

# Broader alternative, intentionally disabled:
# typeattribute systemd_sleep_t unconfined_domain_type;

#============= systemd_logind_t ==============
allow systemd_logind_t {t}:dir search;

#============= systemd_sleep_t ==============
allow systemd_sleep_t {t}:dir search;
allow systemd_sleep_t {t}:file {{ getattr ioctl lock open read write }};
"
        );

        Self {
            name: name.to_string(),
            source,
        }
    }

    pub fn artifacts(&self, work_dir: &Path) -> PolicyArtifacts {
        PolicyArtifacts {
            source: work_dir.join(format!("{}.te", self.name)),
            module: work_dir.join(format!("{}.mod", self.name)),
            package: work_dir.join(format!("{}.pp", self.name)),
        }
    }
}

/// Builds, installs and labels
pub struct PolicyInstaller<'a> {
    tools: &'a dyn PolicyToolchain,
    work_dir: PathBuf,
    swap_dir: PathBuf,
}

impl<'a> PolicyInstaller<'a> {
    pub fn new(tools: &'a dyn PolicyToolchain, work_dir: PathBuf, swap_dir: PathBuf) -> Self {
        Self {
            tools,
            work_dir,
            swap_dir,
        }
    }

    /// Regenerate and install the module, then bind the swap directory to the
    /// swap file label. Re-running replaces the module with an identical one.
    pub fn install(&self, module_name: &str) -> Result<Vec<Warning>> {
        let module = PolicyModule::render(module_name);
        let artifacts = module.artifacts(&self.work_dir);

        let built = self.build_and_install(&module, &artifacts);
        self.cleanup(&module);
        built?;
        info!("selinux: installed policy module {}", module.name);

        let mut warnings = Vec::new();
        let spec = file_context_spec(&self.swap_dir);
        match self
            .tools
            .add_file_context(&spec, defaults::SWAPFILE_SELINUX_TYPE)?
        {
            FileContext::Added => info!(
                "selinux: labelled {} as {}",
                spec,
                defaults::SWAPFILE_SELINUX_TYPE
            ),
            FileContext::AlreadyDefined => warnings.push(Warning::FileContextRegistered(spec)),
        }
        self.tools.restore_labels(&self.swap_dir)?;

        Ok(warnings)
    }

    fn build_and_install(&self, module: &PolicyModule, artifacts: &PolicyArtifacts) -> Result<()> {
        makedirs(&self.work_dir)?;
        write_file(&artifacts.source, &module.source)?;
        self.tools.compile(&artifacts.source, &artifacts.module)?;
        self.tools.package(&artifacts.module, &artifacts.package)?;
        self.tools.install(&artifacts.package)?;
        Ok(())
    }

    fn cleanup(&self, module: &PolicyModule) {
        let pattern = format!("{}/{}.*", self.work_dir.display(), module.name);
        if let Ok(entries) = glob::glob(&pattern) {
            for entry in entries.flatten() {
                debug!("selinux: removing {}", entry.display());
                force_remove(&entry, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePolicy;

    #[test]
    fn test_render_grants_only_needed_permissions() {
        let module = PolicyModule::render("systemd_sleep_swap");
        assert!(module.source.starts_with("module systemd_sleep_swap 1.0;"));

        let allows: Vec<&str> = module
            .source
            .lines()
            .filter(|l| l.starts_with("allow "))
            .collect();
        assert_eq!(
            allows,
            vec![
                "allow systemd_logind_t swapfile_t:dir search;",
                "allow systemd_sleep_t swapfile_t:dir search;",
                "allow systemd_sleep_t swapfile_t:file { getattr ioctl lock open read write };",
            ]
        );
        // the unconfined alternative is present only as a comment
        assert!(module
            .source
            .lines()
            .filter(|l| l.contains("unconfined_domain_type"))
            .all(|l| l.starts_with('#')));
    }

    #[test]
    fn test_artifact_names() {
        let module = PolicyModule::render("m");
        let artifacts = module.artifacts(Path::new("/run/x"));
        assert_eq!(artifacts.source, PathBuf::from("/run/x/m.te"));
        assert_eq!(artifacts.module, PathBuf::from("/run/x/m.mod"));
        assert_eq!(artifacts.package, PathBuf::from("/run/x/m.pp"));
    }

    #[test]
    fn test_parse_module_list() {
        assert_eq!(
            parse_module_list("abrt\nsystemd_sleep_swap\t1.0\n\n"),
            vec!["abrt", "systemd_sleep_swap"]
        );
    }

    #[test]
    fn test_file_context_spec_escapes_directory() {
        assert_eq!(file_context_spec(Path::new("/var/swap")), "/var/swap(/.*)?");
        assert_eq!(
            file_context_spec(Path::new("/var/swap.d")),
            "/var/swap\\.d(/.*)?"
        );
        assert_eq!(
            file_context_spec(Path::new("/srv/a+b[1]")),
            "/srv/a\\+b\\[1\\](/.*)?"
        );
    }

    #[test]
    fn test_install_labels_escaped_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakePolicy::default();
        let installer =
            PolicyInstaller::new(&tools, dir.path().to_path_buf(), PathBuf::from("/var/swap.d"));

        installer.install("systemd_sleep_swap").unwrap();
        assert_eq!(tools.file_contexts(), vec!["/var/swap\\.d(/.*)? swapfile_t"]);
        assert_eq!(tools.relabelled(), vec![PathBuf::from("/var/swap.d")]);
    }

    #[test]
    fn test_install_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakePolicy::default();
        let installer =
            PolicyInstaller::new(&tools, dir.path().to_path_buf(), PathBuf::from("/var/swap"));

        let warnings = installer.install("systemd_sleep_swap").unwrap();
        assert!(warnings.is_empty());
        assert_eq!(tools.installed_modules().unwrap(), vec!["systemd_sleep_swap"]);
        assert_eq!(tools.file_contexts(), vec!["/var/swap(/.*)? swapfile_t"]);
        assert_eq!(tools.relabelled(), vec![PathBuf::from("/var/swap")]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_reinstall_is_an_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakePolicy::default();
        let installer =
            PolicyInstaller::new(&tools, dir.path().to_path_buf(), PathBuf::from("/var/swap"));

        installer.install("systemd_sleep_swap").unwrap();
        let warnings = installer.install("systemd_sleep_swap").unwrap();
        assert_eq!(
            warnings,
            vec![Warning::FileContextRegistered("/var/swap(/.*)?".to_string())]
        );
        assert_eq!(tools.installed_modules().unwrap().len(), 1);
        assert_eq!(tools.file_contexts().len(), 1);
    }

    #[test]
    fn test_compile_failure_is_fatal_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakePolicy::default();
        tools.fail_compile();
        let installer =
            PolicyInstaller::new(&tools, dir.path().to_path_buf(), PathBuf::from("/var/swap"));

        let err = installer.install("systemd_sleep_swap").unwrap_err();
        assert!(matches!(err, PolicyError::Tool { ref tool, .. } if tool == "checkmodule"));
        assert!(tools.installed_modules().unwrap().is_empty());
        assert!(tools.file_contexts().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
