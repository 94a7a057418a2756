//! Product definitions
//!
//! A product definition is read-only configuration: an ordered list of
//! question steps plus the prompts that shape the AI collaborators. Loaded
//! from TOML files at startup; never mutated by the service.

use orrery_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One step of a guided product experience (1-indexed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStep {
    pub step: u32,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    /// Question text shown to the user; blank for upload-only steps
    #[serde(default)]
    pub question: String,
    /// Model-prompt template for this step's insight reply
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub allow_file_upload: bool,
    #[serde(default)]
    pub allow_followup: bool,
}

impl ProductStep {
    /// Upload-only steps render the upload manager; steps with question text
    /// always render as text Q&A, with file attachment as a secondary
    /// affordance.
    pub fn is_upload_only(&self) -> bool {
        self.allow_file_upload && self.question.trim().is_empty()
    }
}

/// Product definition loaded from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub product_slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    pub final_briefing_prompt: String,
    pub steps: Vec<ProductStep>,
}

impl ProductDefinition {
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Look up a step by its 1-based number
    pub fn step(&self, number: u32) -> Option<&ProductStep> {
        if number == 0 {
            return None;
        }
        self.steps.get((number - 1) as usize)
    }

    /// Structural validation: contiguous 1-based numbering, a chart-intake
    /// first step, and at least one question step after the gate.
    pub fn validate(&self) -> Result<()> {
        if self.product_slug.trim().is_empty() {
            return Err(Error::Config("Product slug must not be empty".to_string()));
        }
        if self.steps.len() < 2 {
            return Err(Error::Config(format!(
                "Product '{}' must define at least 2 steps",
                self.product_slug
            )));
        }
        for (idx, step) in self.steps.iter().enumerate() {
            let expected = (idx + 1) as u32;
            if step.step != expected {
                return Err(Error::Config(format!(
                    "Product '{}': step {} is numbered {} (steps must be contiguous from 1)",
                    self.product_slug, expected, step.step
                )));
            }
        }
        if !self.steps[0].allow_file_upload {
            return Err(Error::Config(format!(
                "Product '{}': step 1 must allow file upload (chart intake)",
                self.product_slug
            )));
        }
        Ok(())
    }
}

/// Read-only catalog of product definitions, keyed by slug
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    products: HashMap<String, Arc<ProductDefinition>>,
}

impl ProductCatalog {
    /// Build a catalog from in-memory definitions (used by tests)
    pub fn from_definitions(definitions: Vec<ProductDefinition>) -> Result<Self> {
        let mut products = HashMap::new();
        for definition in definitions {
            definition.validate()?;
            let slug = definition.product_slug.clone();
            if products
                .insert(slug.clone(), Arc::new(definition))
                .is_some()
            {
                return Err(Error::Config(format!("Duplicate product slug: {}", slug)));
            }
        }
        Ok(Self { products })
    }

    /// Load every `*.toml` product definition in a directory
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut definitions = Vec::new();

        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "Products directory does not exist; catalog is empty");
            return Ok(Self::default());
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let definition: ProductDefinition = toml::from_str(&content).map_err(|e| {
                Error::Config(format!("Parse {} failed: {}", path.display(), e))
            })?;
            tracing::info!(
                slug = %definition.product_slug,
                steps = definition.steps.len(),
                "Loaded product definition"
            );
            definitions.push(definition);
        }

        Self::from_definitions(definitions)
    }

    pub fn get(&self, slug: &str) -> Option<Arc<ProductDefinition>> {
        self.products.get(slug).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }
}
