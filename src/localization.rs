use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use unic_langid::LanguageIdentifier;
use std::collections::HashMap;
use std::sync::OnceLock;
use anyhow::{Context, Result};

/// Languages with a bundled message file, English first as the fallback
const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("en", include_str!("../locales/en/main.ftl")),
    ("pt", include_str!("../locales/pt/main.ftl")),
];

const FALLBACK_LANGUAGE: &str = "en";

/// Localization manager for user-facing messages
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Create a new localization manager with every bundled language
    pub fn new() -> Result<Self> {
        let mut bundles = HashMap::new();

        for (code, source) in SUPPORTED_LANGUAGES {
            let locale: LanguageIdentifier = code
                .parse()
                .with_context(|| format!("Invalid language identifier: {code}"))?;
            let bundle = Self::create_bundle(&locale, source)?;
            bundles.insert(code.to_string(), bundle);
        }

        Ok(Self { bundles })
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(locale: &LanguageIdentifier, source: &str) -> Result<FluentBundle<FluentResource>> {
        let mut bundle = FluentBundle::new_concurrent(vec![locale.clone()]);
        // plain terminal output, no bidi isolation marks around arguments
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow::anyhow!("Invalid messages for {locale}: {errors:?}"))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow::anyhow!("Duplicate messages for {locale}: {errors:?}"))?;

        Ok(bundle)
    }

    /// Resolve a language code such as "pt-BR" to a bundled language
    pub fn resolve_language<'a>(&self, language: &'a str) -> &'a str {
        let primary = language.split(['-', '_']).next().unwrap_or(language);
        if self.bundles.contains_key(primary) {
            primary
        } else {
            FALLBACK_LANGUAGE
        }
    }

    pub fn is_supported(&self, language: &str) -> bool {
        let primary = language.split(['-', '_']).next().unwrap_or(language);
        self.bundles.contains_key(primary)
    }

    /// Get a localized message in a language, falling back to English
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let language = self.resolve_language(language);
        let Some(bundle) = self
            .bundles
            .get(language)
            .or_else(|| self.bundles.get(FALLBACK_LANGUAGE))
        else {
            return format!("Missing translation: {key}");
        };

        let msg = match bundle.get_message(key) {
            Some(msg) => msg,
            None => return format!("Missing translation: {key}"),
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {key}"),
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (name, value) in args {
                fluent_args.set(*name, FluentValue::from(*value));
            }
            fluent_args
        });

        let mut errors = vec![];
        bundle
            .format_pattern(pattern, fluent_args.as_ref(), &mut errors)
            .into_owned()
    }

    /// Get a localized message with simple string arguments
    pub fn get_message_with_args(&self, key: &str, language: &str, args: &[(&str, &str)]) -> String {
        let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
        self.get_message_in_language(key, language, Some(&args_map))
    }
}

static LOCALIZATION_MANAGER: OnceLock<LocalizationManager> = OnceLock::new();

/// Initialize the global localization manager
pub fn init_localization() -> Result<()> {
    if LOCALIZATION_MANAGER.get().is_none() {
        let manager = LocalizationManager::new()?;
        let _ = LOCALIZATION_MANAGER.set(manager);
    }
    Ok(())
}

/// Get the global localization manager
pub fn get_localization_manager() -> Result<&'static LocalizationManager> {
    init_localization()?;
    LOCALIZATION_MANAGER
        .get()
        .context("Localization manager not initialized")
}

/// Convenience function to get a localized message in a language
pub fn t_lang(key: &str, language: &str) -> String {
    match get_localization_manager() {
        Ok(manager) => manager.get_message_in_language(key, language, None),
        Err(_) => key.to_string(),
    }
}

/// Convenience function to get a localized message with arguments in a language
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language: &str) -> String {
    match get_localization_manager() {
        Ok(manager) => manager.get_message_with_args(key, language, args),
        Err(_) => key.to_string(),
    }
}
