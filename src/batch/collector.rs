//! # 文件收集器
//!
//! 根据输入路径和模式收集待处理文件列表，并按自然顺序排序
//! （数字片段按整数比较，`a2` 排在 `a10` 前）。
//!
//! ## 功能
//! - 支持单文件和目录输入
//! - glob 模式匹配（逗号分隔多模式）
//! - 递归目录搜索、按名查找目录
//! - 工作快照的读写
//!
//! ## 依赖关系
//! - 被 `commands/relax.rs`, `batch/dispatcher.rs`, `batch/worker.rs` 调用
//! - 使用 `walkdir` 遍历目录, `glob` 匹配文件名, `regex` 切分数字片段

use crate::error::{PipelineError, Result};
use crate::relax::is_relaxed_file;

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// 文件收集器
pub struct FileCollector {
    /// 输入路径
    input: PathBuf,
    /// 匹配模式列表
    patterns: Vec<String>,
    /// 是否递归
    recursive: bool,
    /// 是否排除 `*_relax.*` 弛豫产物
    skip_relaxed: bool,
}

impl FileCollector {
    /// 创建新的文件收集器
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            patterns: vec!["*".to_string()],
            recursive: false,
            skip_relaxed: false,
        }
    }

    /// 设置匹配模式（逗号分隔的多模式）
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.patterns = pattern
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if self.patterns.is_empty() {
            self.patterns = vec!["*".to_string()];
        }
        self
    }

    /// 设置是否递归搜索
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 排除弛豫产物，只保留候选结构
    pub fn skip_relaxed(mut self, skip: bool) -> Self {
        self.skip_relaxed = skip;
        self
    }

    /// 收集所有匹配的文件，按自然顺序返回
    pub fn collect(&self) -> Result<Vec<PathBuf>> {
        if self.input.is_file() {
            return Ok(vec![self.input.clone()]);
        }

        if !self.input.is_dir() {
            return Err(PipelineError::DirectoryNotFound {
                path: self.input.display().to_string(),
            });
        }

        let patterns = self
            .patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| {
                    PipelineError::InvalidArgument(format!("Invalid pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // 隐藏文件（如未完成的临时文件）不参与匹配
        let options = glob::MatchOptions {
            require_literal_leading_dot: true,
            ..glob::MatchOptions::new()
        };
        let max_depth = if self.recursive { usize::MAX } else { 1 };

        let mut files: Vec<PathBuf> = WalkDir::new(&self.input)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|name| patterns.iter().any(|p| p.matches_with(name, options)))
                    .unwrap_or(false)
            })
            .filter(|e| !(self.skip_relaxed && is_relaxed_file(e.path())))
            .map(|e| e.path().to_path_buf())
            .collect();

        sort_naturally(&mut files);
        Ok(files)
    }
}

/// 自然排序键的一个片段
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalChunk {
    Text(String),
    /// 去掉前导零后的数字串；先比位数再比字典序，等价于整数比较
    Number { digits: usize, value: String },
}

/// 自然排序键：文本片段小写，数字片段按整数比较
pub fn natural_sort_key(s: &str) -> Vec<NaturalChunk> {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let digits = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("valid regex"));

    let mut key = Vec::new();
    let mut last = 0;
    for m in digits.find_iter(s) {
        key.push(NaturalChunk::Text(s[last..m.start()].to_lowercase()));
        let trimmed = m.as_str().trim_start_matches('0');
        key.push(NaturalChunk::Number {
            digits: trimmed.len(),
            value: trimmed.to_string(),
        });
        last = m.end();
    }
    key.push(NaturalChunk::Text(s[last..].to_lowercase()));
    key
}

/// 按文件名自然排序
pub fn sort_naturally(paths: &mut [PathBuf]) {
    paths.sort_by_cached_key(|p| {
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (natural_sort_key(&name), p.clone())
    });
}

/// 查找名为 `name` 的目录：先看 `root/name`，再递归搜索 `root`
pub fn find_dir_named(root: &Path, name: &str) -> Option<PathBuf> {
    let direct = root.join(name);
    if direct.is_dir() {
        return Some(direct);
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_dir() && e.file_name() == name)
        .map(|e| e.path().to_path_buf())
}

/// 写出工作快照：每行一个路径
pub fn write_snapshot(path: &Path, files: &[PathBuf]) -> Result<()> {
    let mut text = String::new();
    for file in files {
        text.push_str(&file.display().to_string());
        text.push('\n');
    }
    fs::write(path, text).map_err(|e| PipelineError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

/// 读取工作快照，忽略空行
pub fn read_snapshot(path: &Path) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            PipelineError::FileReadError {
                path: path.display().to_string(),
                source: e,
            }
        }
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}
