use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::InterviewConfig;
use crate::template::builtin;
use crate::template::models::{Template, TemplateDocument, TemplateSummary};
use crate::template::validator::{load_template, TemplateError};

/// All templates known to the service, validated once at startup.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Arc<Template>>,
}

impl TemplateCatalog {
    /// Built-in templates plus every `*.json` file in `dir`.
    /// A template that fails validation is logged and skipped.
    pub fn load(config: &InterviewConfig, dir: Option<&Path>) -> Self {
        let mut catalog = Self::default();
        catalog.insert("builtin:nurse-screening", builtin::nurse_screening(config));

        if let Some(dir) = dir {
            for (source, document) in read_dir(dir) {
                catalog.insert(&source, document);
            }
        }

        info!("Template catalog ready with {} template(s)", catalog.templates.len());
        catalog
    }

    fn insert(&mut self, source: &str, document: Result<TemplateDocument, TemplateError>) {
        let template = match document.and_then(load_template) {
            Ok(template) => template,
            Err(e) => {
                warn!("Skipping template from {source}: {e}");
                return;
            }
        };
        if self.templates.contains_key(&template.id) {
            warn!("Skipping template from {source}: id '{}' already loaded", template.id);
            return;
        }
        self.templates.insert(template.id.clone(), Arc::new(template));
    }

    pub fn get(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.get(id).cloned()
    }

    pub fn list(&self) -> Vec<TemplateSummary> {
        self.templates
            .values()
            .map(|t| TemplateSummary::from(t.as_ref()))
            .collect()
    }
}

pub fn parse_document(raw: &str) -> Result<TemplateDocument, TemplateError> {
    serde_json::from_str(raw).map_err(|e| TemplateError::Parse(e.to_string()))
}

fn read_dir(dir: &Path) -> Vec<(String, Result<TemplateDocument, TemplateError>)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read template directory {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let document = std::fs::read_to_string(&path)
                .map_err(|e| TemplateError::Parse(e.to_string()))
                .and_then(|raw| parse_document(&raw));
            (path.display().to_string(), document)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::builtin::NURSE_SCREENING_ID;

    const ONBOARDING: &str = r#"{
        "id": "onboarding",
        "name": "Onboarding check",
        "steps": [
            {"id": "start", "type": "question", "content": "Ready?", "nextSteps": {"default": "end"}},
            {"id": "end", "type": "exit", "content": "Done"}
        ]
    }"#;

    #[test]
    fn test_builtin_only() {
        let catalog = TemplateCatalog::load(&InterviewConfig::default(), None);
        assert!(catalog.get(NURSE_SCREENING_ID).is_some());
        assert_eq!(catalog.list().len(), 1);
    }

    #[test]
    fn test_directory_templates_and_invalid_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("onboarding.json"), ONBOARDING).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(
            dir.path().join("cycle.json"),
            r#"{"id": "cycle", "name": "C", "steps": [
                {"id": "a", "type": "question", "content": "?", "nextSteps": {"default": "a"}}
            ]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = TemplateCatalog::load(&InterviewConfig::default(), Some(dir.path()));
        let ids: Vec<String> = catalog.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![NURSE_SCREENING_ID.to_string(), "onboarding".to_string()]);
        assert!(catalog.get("cycle").is_none());
    }

    #[test]
    fn test_builtin_id_cannot_be_shadowed() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = ONBOARDING.replace("\"onboarding\"", "\"nurse-screening\"");
        std::fs::write(dir.path().join("shadow.json"), shadow).unwrap();

        let catalog = TemplateCatalog::load(&InterviewConfig::default(), Some(dir.path()));
        assert_eq!(catalog.get(NURSE_SCREENING_ID).unwrap().steps.len(), 11);
    }

    #[test]
    fn test_missing_directory_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TemplateCatalog::load(&InterviewConfig::default(), Some(&dir.path().join("nope")));
        assert_eq!(catalog.list().len(), 1);
    }
}
