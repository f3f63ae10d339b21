//! One-shot requests: ticket issue analysis and device registry lookup.
//!
//! Neither call fails from the caller's point of view. Service errors are
//! logged and replaced by a fallback text in the working language.

use crate::aggregator::SourceSet;
use crate::api::{Content, GenerativeApiProvider, ServiceRequest};
use crate::models::{AnalysisRequest, RegistryCheckResult};
use crate::prompt::{self, WorkingLanguage};
use crate::router::{self, Capability, ModelCatalog, SelectionOptions};

pub async fn analyze_ticket_issue(
    provider: &dyn GenerativeApiProvider,
    catalog: &ModelCatalog,
    language: WorkingLanguage,
    request: &AnalysisRequest,
) -> String {
    let options = SelectionOptions {
        use_thinking: request.use_thinking,
        has_image: request.attached_image().is_some(),
    };
    let selection = router::select_configuration(Capability::IssueAnalysis, options);
    let model = catalog.model_for(selection.tier);
    let service_request = ServiceRequest {
        contents: vec![Content::user(prompt::build_issue_analysis(request, language))],
        config: selection.config,
    };

    log::info!("Analyzing issue '{}' on {} with {}", request.title, request.device_name, model);
    match provider.send_one_shot(model, &service_request).await {
        Ok(response) if !response.text.trim().is_empty() => response.text,
        Ok(_) => {
            log::warn!("Issue analysis returned an empty response");
            language.phrases().analysis_empty.to_string()
        }
        Err(e) => {
            log::error!("Issue analysis failed: {}", e);
            language.phrases().analysis_error.to_string()
        }
    }
}

pub async fn check_device_registry(
    provider: &dyn GenerativeApiProvider,
    catalog: &ModelCatalog,
    language: WorkingLanguage,
    device_name: &str,
    serial_number: &str,
) -> RegistryCheckResult {
    let selection = router::select_configuration(Capability::RegistryCheck, SelectionOptions::default());
    let model = catalog.model_for(selection.tier);
    let service_request = ServiceRequest {
        contents: vec![Content::user(prompt::build_registry_check(device_name, serial_number, language))],
        config: selection.config,
    };

    log::info!("Checking registry for {} ({}) with {}", device_name, serial_number, model);
    match provider.send_one_shot(model, &service_request).await {
        Ok(response) => {
            let mut sources = SourceSet::default();
            sources.extend_new(response.sources);
            let text = if response.text.trim().is_empty() {
                language.phrases().registry_empty.to_string()
            } else {
                response.text
            };
            RegistryCheckResult { text, sources: sources.into_vec() }
        }
        Err(e) => {
            log::error!("Registry check failed: {}", e);
            RegistryCheckResult {
                text: language.phrases().registry_error.to_string(),
                sources: Vec::new(),
            }
        }
    }
}
