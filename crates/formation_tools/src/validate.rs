//! Template data validation.
//!
//! Walks a data directory, parses every `.ron` file as a
//! [`FormationTemplate`] and rejects duplicate template names.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use formation_core::data::FormationTemplate;

use crate::error::{Result, ToolError};

/// A template that passed validation together with its source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTemplate {
    /// File the template was read from.
    pub path: PathBuf,
    /// The parsed template.
    pub template: FormationTemplate,
}

/// Validate all RON template files in a directory tree.
///
/// Files are visited in sorted path order so duplicate reports are stable.
///
/// # Errors
///
/// Returns an error if a file cannot be read, fails to parse or validate,
/// reuses another file's template name, or if no template is found.
pub fn validate_data_directory(path: &Path) -> Result<Vec<ValidatedTemplate>> {
    let mut files = Vec::new();
    collect_ron_files(path, &mut files)?;
    files.sort();

    if files.is_empty() {
        return Err(ToolError::NoTemplates(path.to_path_buf()));
    }

    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut validated = Vec::with_capacity(files.len());

    for file in files {
        let template = validate_template_file(&file)?;
        if let Some(first) = seen.get(&template.name) {
            return Err(ToolError::DuplicateName {
                name: template.name,
                first: first.clone(),
                second: file,
            });
        }
        seen.insert(template.name.clone(), file.clone());

        tracing::info!(
            path = %file.display(),
            name = %template.name,
            shape = ?template.shape,
            "Template valid"
        );
        validated.push(ValidatedTemplate { path: file, template });
    }

    Ok(validated)
}

/// Parse and validate a single template file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid template.
pub fn validate_template_file(path: &Path) -> Result<FormationTemplate> {
    let text = fs::read_to_string(path).map_err(|source| ToolError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    FormationTemplate::from_ron(&text).map_err(|source| ToolError::Template {
        path: path.to_path_buf(),
        source,
    })
}

fn collect_ron_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let io_error = |source| ToolError::Io {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_dir() {
            collect_ron_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "ron") {
            files.push(path);
        }
    }
    Ok(())
}
