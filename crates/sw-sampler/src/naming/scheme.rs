// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configurable naming strategies, evaluated in order before the built-in fallbacks.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::context::{AttributeValue, Attributes};

/// Name of the only strategy type understood so far.
pub const SPAN_ATTRIBUTE_SCHEME: &str = "spanAttribute";

/// One configured strategy, as found in the JSON configuration.
///
/// ```json
/// [{ "scheme": "spanAttribute", "delimiter": "-", "attributes": ["http.method"] }]
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TransactionNamingScheme {
    pub scheme: Option<String>,
    pub delimiter: Option<String>,
    pub attributes: Option<Vec<String>>,
}

/// A single naming strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamingScheme {
    /// Joins the values of the listed attributes, in list order, with `delimiter`. Array values
    /// contribute each of their elements.
    SpanAttribute { delimiter: String, keys: Vec<String> },
}

impl NamingScheme {
    /// Returns `None` when the strategy has nothing to say about these attributes, handing the
    /// decision to the next strategy.
    #[must_use]
    pub fn create_name(&self, attributes: &Attributes) -> Option<String> {
        match self {
            NamingScheme::SpanAttribute { delimiter, keys } => {
                let mut items = Vec::new();
                for value in keys.iter().filter_map(|key| attributes.get(key)) {
                    match value {
                        AttributeValue::Array(values) => {
                            items.extend(values.iter().map(ToString::to_string));
                        }
                        value => items.push(value.to_string()),
                    }
                }
                if keys.iter().any(|key| attributes.contains_key(key)) {
                    Some(items.join(delimiter))
                } else {
                    None
                }
            }
        }
    }
}

/// Ordered list of strategies; the first one producing a name wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamingChain {
    schemes: Vec<NamingScheme>,
}

impl NamingChain {
    #[must_use]
    pub fn new(schemes: Vec<NamingScheme>) -> Self {
        Self { schemes }
    }

    /// Builds the chain from configured entries, skipping the ones that cannot be used.
    #[must_use]
    pub fn from_config(configured: Vec<Option<TransactionNamingScheme>>) -> Self {
        let mut schemes = Vec::with_capacity(configured.len());
        for entry in configured {
            let Some(entry) = entry else {
                debug!("Null naming scheme encountered, check for trailing commas");
                continue;
            };
            match entry {
                TransactionNamingScheme {
                    delimiter: Some(delimiter),
                    attributes: Some(keys),
                    ..
                } => schemes.push(NamingScheme::SpanAttribute { delimiter, keys }),
                TransactionNamingScheme { scheme, .. } => warn!(
                    "Naming scheme {} is missing required fields and has no effect",
                    scheme.as_deref().unwrap_or("<unnamed>")
                ),
            }
        }
        Self::new(schemes)
    }

    /// Parses the JSON list of configured strategies.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let configured: Vec<Option<TransactionNamingScheme>> = serde_json::from_str(json)?;
        Ok(Self::from_config(configured))
    }

    /// Name produced by the first strategy with something to say. That name may be empty when
    /// the strategy's attributes are present but blank; later strategies are not consulted.
    #[must_use]
    pub fn create_name(&self, attributes: &Attributes) -> Option<String> {
        self.schemes
            .iter()
            .find_map(|scheme| scheme.create_name(attributes))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }
}
