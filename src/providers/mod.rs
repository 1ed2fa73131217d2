use std::sync::Arc;

use crate::{config::ProvidersConfig, error::ProviderError, ports::AnnotationProvider};

pub mod openai_compatible;

pub type ProviderPair = (
    Arc<dyn AnnotationProvider>,
    Option<Arc<dyn AnnotationProvider>>,
);

pub fn build_providers(config: &ProvidersConfig) -> Result<ProviderPair, ProviderError> {
    let primary: Arc<dyn AnnotationProvider> = Arc::new(
        openai_compatible::OpenAiCompatibleProvider::new(config.primary.clone())?,
    );
    let secondary = match &config.secondary {
        Some(profile) => Some(Arc::new(openai_compatible::OpenAiCompatibleProvider::new(
            profile.clone(),
        )?) as Arc<dyn AnnotationProvider>),
        None => None,
    };
    Ok((primary, secondary))
}
