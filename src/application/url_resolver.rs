//! Source URL derivation
//!
//! A fixed template filled with a slug: either the hand-curated override for
//! the id in its own partition, or `lower(id)-epar-product-information`.

use std::collections::HashMap;

use url::Url;

use crate::domain::catalog::{CanonicalId, StatusPartition};
use crate::infrastructure::config::{UrlConfig, UrlOverride};
use crate::infrastructure::sync_error::{SyncError, SyncResult};

const DEFAULT_SLUG_SUFFIX: &str = "-epar-product-information";

#[derive(Debug, Clone)]
pub struct UrlResolver {
    template: String,
    language: String,
    authorised: HashMap<String, String>,
    withdrawn: HashMap<String, String>,
}

impl UrlResolver {
    /// Fails when the template has no `{slug}` or does not render to a URL.
    pub fn new(config: &UrlConfig, language: &str) -> SyncResult<Self> {
        let invalid = |reason: String| SyncError::InvalidUrlTemplate {
            template: config.template.clone(),
            reason,
        };
        if !config.template.contains("{slug}") {
            return Err(invalid("missing {slug} placeholder".to_string()));
        }

        let resolver = Self {
            template: config.template.clone(),
            language: language.to_string(),
            authorised: to_table(&config.authorised_overrides),
            withdrawn: to_table(&config.withdrawn_overrides),
        };
        Url::parse(&resolver.render("probe")).map_err(|e| invalid(e.to_string()))?;
        Ok(resolver)
    }

    #[must_use]
    pub fn resolve(&self, id: &CanonicalId, partition: StatusPartition) -> String {
        let overrides = match partition {
            StatusPartition::Authorised => &self.authorised,
            StatusPartition::Withdrawn => &self.withdrawn,
        };
        match overrides.get(id.as_str()) {
            Some(slug) => self.render(slug),
            None => self.render(&default_slug(id)),
        }
    }

    fn render(&self, slug: &str) -> String {
        self.template
            .replace("{lang}", &self.language)
            .replace("{slug}", slug)
    }
}

#[must_use]
pub fn default_slug(id: &CanonicalId) -> String {
    format!("{}{DEFAULT_SLUG_SUFFIX}", id.as_str().to_lowercase())
}

fn to_table(overrides: &[UrlOverride]) -> HashMap<String, String> {
    overrides
        .iter()
        .map(|o| (o.id.clone(), o.slug.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn resolver() -> UrlResolver {
        UrlResolver::new(&UrlConfig::default(), "en").unwrap()
    }

    #[rstest]
    #[case(
        "Druga",
        StatusPartition::Authorised,
        "https://www.ema.europa.eu/en/documents/product-information/druga-epar-product-information_en.pdf"
    )]
    #[case(
        "Arikayce-liposomal",
        StatusPartition::Authorised,
        "https://www.ema.europa.eu/en/documents/product-information/arikayce-liposomal-product-information_en.pdf"
    )]
    #[case(
        "Arikayce-liposomal",
        StatusPartition::Withdrawn,
        "https://www.ema.europa.eu/en/documents/product-information/arikayce-liposomal-epar-product-information_en.pdf"
    )]
    fn overrides_apply_only_in_their_partition(
        #[case] id: &str,
        #[case] partition: StatusPartition,
        #[case] expected: &str,
    ) {
        assert_eq!(resolver().resolve(&CanonicalId::from(id), partition), expected);
    }

    #[test]
    fn withdrawn_override_table_is_separate() {
        let config = UrlConfig {
            withdrawn_overrides: vec![UrlOverride {
                id: "Druga".to_string(),
                slug: "druga-withdrawn".to_string(),
            }],
            ..UrlConfig::default()
        };
        let resolver = UrlResolver::new(&config, "fr").unwrap();
        let id = CanonicalId::from("Druga");
        assert!(resolver.resolve(&id, StatusPartition::Withdrawn).ends_with("/druga-withdrawn_fr.pdf"));
        assert!(resolver
            .resolve(&id, StatusPartition::Authorised)
            .ends_with("/druga-epar-product-information_fr.pdf"));
    }

    #[rstest]
    #[case("https://host/{lang}/doc.pdf")]
    #[case("not a url {slug}")]
    fn rejects_unusable_templates(#[case] template: &str) {
        let config = UrlConfig {
            template: template.to_string(),
            ..UrlConfig::default()
        };
        assert!(matches!(
            UrlResolver::new(&config, "en"),
            Err(SyncError::InvalidUrlTemplate { .. })
        ));
    }
}
