//! 源码收集：遍历项目目录，按扩展名、目录与文件模式筛选

use anyhow::{Result, bail};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::PipelineConfig;

/// 扩展名到语言名的映射
const LANGUAGE_TABLE: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("java", "java"),
    ("go", "go"),
    ("rs", "rust"),
    ("rb", "ruby"),
    ("php", "php"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cs", "csharp"),
    ("swift", "swift"),
    ("kt", "kotlin"),
    ("scala", "scala"),
    ("r", "r"),
    ("sh", "bash"),
    ("sql", "sql"),
    ("html", "html"),
    ("css", "css"),
];

/// 未配置included_extensions时处理的源码扩展名
pub const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "java", "cpp", "c", "h", "go", "rs", "cs", "rb", "php",
];

/// 其中的源码文件只计入测试清单
const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec", "specs"];

/// 项目元数据文件（小写文件名）
const METADATA_FILENAMES: &[&str] = &[
    "readme.md",
    "readme.rst",
    "readme.txt",
    "readme",
    "license",
    "license.md",
    "license.txt",
    "package.json",
    "requirements.txt",
    "setup.py",
    "setup.cfg",
    "pyproject.toml",
    "dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "makefile",
    "cargo.toml",
    "go.mod",
    "tsconfig.json",
    "changelog.md",
    "changelog",
    "changes.md",
];

/// 一个待处理的源码文件，path为相对项目根目录的路径
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// 一次收集的全部结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFiles {
    /// 需要走Agent流水线的源码文件
    pub files: Vec<SourceFile>,
    /// README、LICENSE等元数据文件
    pub metadata_files: Vec<SourceFile>,
    /// 测试目录中的源码文件路径
    pub test_files: Vec<String>,
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// 按扩展名识别语言
pub fn language_from_path(path: &str) -> Option<&'static str> {
    let extension = extension_of(path)?;
    LANGUAGE_TABLE
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, language)| *language)
}

/// 提示词使用的语言，无法识别时按python处理
pub fn prompt_language(path: &str) -> &'static str {
    language_from_path(path).unwrap_or("python")
}

/// 统计展示使用的语言，无法识别时为text
pub fn display_language(path: &str) -> &'static str {
    language_from_path(path).unwrap_or("text")
}

fn is_excluded_dir(name: &str, config: &PipelineConfig) -> bool {
    config
        .excluded_dirs
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(name))
}

fn is_allowed_extension(extension: &str, config: &PipelineConfig) -> bool {
    if config.included_extensions.is_empty() {
        DEFAULT_SOURCE_EXTENSIONS.contains(&extension)
    } else {
        config
            .included_extensions
            .iter()
            .any(|included| included.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

fn in_test_dir(relative_path: &str) -> bool {
    let mut components: Vec<&str> = relative_path.split('/').collect();
    components.pop();
    components
        .iter()
        .any(|component| TEST_DIRS.contains(&component.to_lowercase().as_str()))
}

fn compile_patterns(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|pattern| match Pattern::new(pattern) {
            Ok(compiled) => Some(compiled),
            Err(err) => {
                warn!("Ignoring invalid exclude pattern '{}': {}", pattern, err);
                None
            }
        })
        .collect()
}

/// 收集源码文件、元数据文件与测试文件清单，结果按路径排序
pub fn collect_repository(root: &Path, config: &PipelineConfig) -> Result<RepositoryFiles> {
    if !root.is_dir() {
        bail!("Project path is not a directory: {}", root.display());
    }

    let excluded_patterns = compile_patterns(&config.excluded_files);
    let mut repository = RepositoryFiles::default();
    let mut skipped_over_limit = 0usize;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !is_excluded_dir(&entry.file_name().to_string_lossy(), config)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = pathdiff::diff_paths(path, root)
            .unwrap_or_else(|| path.to_path_buf())
            .to_string_lossy()
            .replace('\\', "/");
        let file_name = entry.file_name().to_string_lossy().to_lowercase();

        if excluded_patterns
            .iter()
            .any(|pattern| pattern.matches(&file_name) || pattern.matches(&relative))
        {
            debug!("Excluded by pattern: {}", relative);
            continue;
        }

        if METADATA_FILENAMES.contains(&file_name.as_str()) {
            match std::fs::read_to_string(path) {
                Ok(content) => repository
                    .metadata_files
                    .push(SourceFile::new(relative, content)),
                Err(err) => warn!("Could not read metadata file {}: {}", relative, err),
            }
            continue;
        }

        let Some(extension) = extension_of(&relative) else {
            continue;
        };
        if !is_allowed_extension(&extension, config) {
            continue;
        }

        if in_test_dir(&relative) {
            repository.test_files.push(relative);
            continue;
        }

        let size = entry.metadata().map(|metadata| metadata.len()).unwrap_or(0);
        if size > config.max_file_size {
            debug!("Skipping {} ({} bytes exceeds limit)", relative, size);
            continue;
        }

        if repository.files.len() >= config.max_files {
            skipped_over_limit += 1;
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => repository.files.push(SourceFile::new(relative, content)),
            Err(err) => warn!("Could not read {}: {}", relative, err),
        }
    }

    if skipped_over_limit > 0 {
        info!(
            "Limiting to {} files, {} more were skipped",
            config.max_files, skipped_over_limit
        );
    }

    repository.files.sort_by(|a, b| a.path.cmp(&b.path));
    repository
        .metadata_files
        .sort_by(|a, b| a.path.cmp(&b.path));
    repository.test_files.sort();
    Ok(repository)
}

/// 只收集需要走流水线的源码文件
pub fn collect_source_files(root: &Path, config: &PipelineConfig) -> Result<Vec<SourceFile>> {
    Ok(collect_repository(root, config)?.files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_language_from_path() {
        assert_eq!(language_from_path("src/app.py"), Some("python"));
        assert_eq!(language_from_path("web/App.TSX"), Some("typescript"));
        assert_eq!(language_from_path("include/util.h"), Some("c"));
        assert_eq!(language_from_path("scripts/run.sh"), Some("bash"));
        assert_eq!(language_from_path("Makefile"), None);

        assert_eq!(prompt_language("notes.txt"), "python");
        assert_eq!(display_language("notes.txt"), "text");
        assert_eq!(display_language("lib.rs"), "rust");
    }

    #[test]
    fn test_collect_repository_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "src/b.py", "def b(): pass");
        write(root, "src/a.js", "function a() {}");
        write(root, "src/vendor.min.js", "x");
        write(root, "node_modules/pkg/index.js", "module.exports = 1");
        write(root, "tests/test_a.py", "def test_a(): pass");
        write(root, "README.md", "# Demo");
        write(root, "notes.txt", "ignored");
        write(root, "big.py", &"x = 1\n".repeat(20));

        let config = PipelineConfig {
            max_file_size: 64,
            ..PipelineConfig::default()
        };
        let repository = collect_repository(root, &config).unwrap();

        let paths: Vec<&str> = repository.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.js", "src/b.py"]);
        assert_eq!(repository.files[1].content, "def b(): pass");
        assert_eq!(repository.files[1].file_name(), "b.py");
        assert_eq!(repository.test_files, vec!["tests/test_a.py"]);
        assert_eq!(repository.metadata_files.len(), 1);
        assert_eq!(repository.metadata_files[0].path, "README.md");
    }

    #[test]
    fn test_collect_source_files_respects_limits() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for name in ["a", "b", "c"] {
            write(root, &format!("{}.rs", name), "fn main() {}");
        }
        write(root, "d.go", "package main");

        let config = PipelineConfig {
            max_files: 2,
            included_extensions: vec![".rs".to_string()],
            ..PipelineConfig::default()
        };
        let files = collect_source_files(root, &config).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn test_collect_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(collect_source_files(&missing, &PipelineConfig::default()).is_err());
    }
}
