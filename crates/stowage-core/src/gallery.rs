//! Curated models offered for download.

use crate::error::Result;
use crate::source::SourceLocator;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    Small,
    Medium,
    Large,
}

impl ModelCategory {
    pub fn label(&self) -> &'static str {
        match self {
            ModelCategory::Small => "Small (1-2GB)",
            ModelCategory::Medium => "Medium (2-5GB)",
            ModelCategory::Large => "Large (5GB+)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    Fast,
    Multilingual,
    Coding,
    Creative,
    Reasoning,
    LongContext,
}

impl ModelCapability {
    pub fn label(&self) -> &'static str {
        match self {
            ModelCapability::Fast => "Fast",
            ModelCapability::Multilingual => "Multilingual",
            ModelCapability::Coding => "Coding",
            ModelCapability::Creative => "Creative",
            ModelCapability::Reasoning => "Reasoning",
            ModelCapability::LongContext => "Long Context",
        }
    }
}

/// A downloadable model and where to get it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryModel {
    pub name: &'static str,
    pub url: &'static str,
    pub size: &'static str,
    pub description: &'static str,
    pub category: ModelCategory,
    pub capabilities: &'static [ModelCapability],
    pub version: &'static str,
    pub provider: &'static str,
    pub context_window: &'static str,
}

impl GalleryModel {
    /// Primary source to download from.
    pub fn source(&self) -> Result<SourceLocator> {
        SourceLocator::parse(self.url)
    }
}

use ModelCapability::*;
use ModelCategory::*;

const MODELS: &[GalleryModel] = &[
    GalleryModel {
        name: "Llama-3.2-3B-Instruct",
        url: "https://huggingface.co/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q4_K_M.gguf?download=true",
        size: "2.02 GB",
        description: "Meta's Llama 3.2 3B is a compact model with excellent instruction-following capabilities.",
        category: Medium,
        capabilities: &[Fast, Reasoning],
        version: "3.2",
        provider: "Meta",
        context_window: "8K",
    },
    GalleryModel {
        name: "Granite-3.3-2B-Instruct",
        url: "https://huggingface.co/ibm-granite/granite-3.3-2b-instruct-GGUF/resolve/main/granite-3.3-2b-instruct-Q4_K_M.gguf?download=true",
        size: "1.55 GB",
        description: "IBM's Granite 3.3 2B model with 128K context window.",
        category: Small,
        capabilities: &[Fast, Reasoning],
        version: "3.3",
        provider: "IBM",
        context_window: "128K",
    },
    GalleryModel {
        name: "Granite-3.3-8B-Instruct",
        url: "https://huggingface.co/ibm-granite/granite-3.3-8b-instruct-GGUF/resolve/main/granite-3.3-8b-instruct-Q4_K_M.gguf?download=true",
        size: "4.94 GB",
        description: "IBM's Granite 3.3 8B model with extended context.",
        category: Medium,
        capabilities: &[Reasoning, Creative],
        version: "3.3",
        provider: "IBM",
        context_window: "128K",
    },
    GalleryModel {
        name: "Gemma-3-1B-Instruct",
        url: "https://huggingface.co/unsloth/gemma-3-1b-it-GGUF/resolve/main/gemma-3-1b-it-Q4_K_M.gguf?download=true",
        size: "0.80 GB",
        description: "Google's Gemma 3 1B instruct-tuned model with extended context.",
        category: Small,
        capabilities: &[Multilingual, Fast],
        version: "3",
        provider: "Google",
        context_window: "128K",
    },
    GalleryModel {
        name: "Phi-4-Mini-3.8B-Instruct",
        url: "https://huggingface.co/unsloth/Phi-4-mini-instruct-GGUF/resolve/main/Phi-4-mini-instruct-Q4_K_M.gguf?download=true",
        size: "2.50 GB",
        description: "Microsoft's Phi 4 Mini 3.8B model with large context.",
        category: Medium,
        capabilities: &[Fast, Reasoning],
        version: "4-mini",
        provider: "Microsoft",
        context_window: "128K",
    },
    GalleryModel {
        name: "Gemma-3-4B-Instruct",
        url: "https://huggingface.co/unsloth/gemma-3-4b-it-GGUF/resolve/main/gemma-3-4b-it-Q4_K_M.gguf?download=true",
        size: "2.49 GB",
        description: "Google's Gemma 3 4B instruct-tuned model.",
        category: Medium,
        capabilities: &[Multilingual, Creative],
        version: "3",
        provider: "Google",
        context_window: "128K",
    },
    GalleryModel {
        name: "Gemma-3-12B-Instruct",
        url: "https://huggingface.co/unsloth/gemma-3-12b-it-GGUF/resolve/main/gemma-3-12b-it-Q4_K_M.gguf?download=true",
        size: "7.30 GB",
        description: "Google's Gemma 3 12B model for advanced reasoning tasks.",
        category: Large,
        capabilities: &[Multilingual, Creative, Reasoning],
        version: "3",
        provider: "Google",
        context_window: "128K",
    },
    GalleryModel {
        name: "Mistral-Nemo-12B-Instruct",
        url: "https://huggingface.co/starble-dev/Mistral-Nemo-12B-Instruct-2407-GGUF/resolve/main/Mistral-Nemo-12B-Instruct-2407-Q4_K_M.gguf?download=true",
        size: "7.20 GB",
        description: "NVIDIA's Mistral Nemo 12B instruction model.",
        category: Large,
        capabilities: &[Reasoning, Coding],
        version: "2407",
        provider: "NVIDIA",
        context_window: "8K",
    },
    GalleryModel {
        name: "Phi-4-14B-Instruct",
        url: "https://huggingface.co/theprint/ReWiz-Phi-4-14B-GGUF/resolve/main/ReWiz-Phi-4-14B.Q4_K_M.gguf?download=true",
        size: "8.89 GB",
        description: "Microsoft's Phi 4 14B instruct-tuned model with extensive context handling.",
        category: Large,
        capabilities: &[Reasoning, Multilingual],
        version: "4",
        provider: "Microsoft",
        context_window: "128K",
    },
];

/// All gallery models, in display order.
pub fn models() -> &'static [GalleryModel] {
    MODELS
}

/// Find a gallery model by display name (case-insensitive) or by the file
/// name its source installs.
pub fn find(name: &str) -> Option<&'static GalleryModel> {
    MODELS.iter().find(|model| {
        model.name.eq_ignore_ascii_case(name)
            || model
                .source()
                .map(|source| source.file_name() == name)
                .unwrap_or(false)
    })
}

/// Models in one size category.
pub fn by_category(category: ModelCategory) -> impl Iterator<Item = &'static GalleryModel> {
    MODELS.iter().filter(move |model| model.category == category)
}
