use crate::error::AppError;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextFile {
    pub filename: String,
    pub content: String,
}

/// Markdown files in `dir`, sorted by filename. A missing directory is an error
/// because the caller asked for it explicitly.
pub fn read_context_files(dir: &Path) -> Result<Vec<ContextFile>, AppError> {
    if !dir.is_dir() {
        return Err(AppError::Config(format!(
            "context directory {} does not exist",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(filename) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let content = fs::read_to_string(&path)?;
        files.push(ContextFile { filename, content });
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

/// Join free text and context files into the company context the prompts use.
/// Each file becomes a `### <filename>` section; blank files are skipped.
pub fn compile_context(text: Option<&str>, files: &[ContextFile]) -> String {
    let mut sections: Vec<String> = Vec::new();
    if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
        sections.push(text.to_string());
    }
    for file in files {
        let content = file.content.trim();
        if !content.is_empty() {
            sections.push(format!("### {}\n{}", file.filename, content));
        }
    }
    sections.join("\n\n")
}

/// Company context from `--context` and `--context-dir`.
pub fn load_company_context(text: Option<&str>, dir: Option<&Path>) -> Result<String, AppError> {
    let files = match dir {
        Some(dir) => read_context_files(dir)?,
        None => Vec::new(),
    };
    Ok(compile_context(text, &files))
}
