//! Prompt assembly for chat turns, issue analysis and registry lookups.
//!
//! Everything here is pure data transformation; nothing talks to the service.

use crate::models::AnalysisRequest;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Language the assistant is asked to answer in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkingLanguage {
    #[default]
    Arabic,
    English,
}

impl FromStr for WorkingLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ar" | "arabic" => Ok(WorkingLanguage::Arabic),
            "en" | "english" => Ok(WorkingLanguage::English),
            other => Err(format!("Unsupported working language: {}", other)),
        }
    }
}

/// User-visible canned texts, one table per language.
pub struct Phrases {
    pub welcome: &'static str,
    pub chat_error: &'static str,
    pub reply_stopped: &'static str,
    pub analysis_empty: &'static str,
    pub analysis_error: &'static str,
    pub registry_empty: &'static str,
    pub registry_error: &'static str,
    pub unknown_device: &'static str,
}

const ARABIC_PHRASES: Phrases = Phrases {
    welcome: "مرحباً بك! أنا مساعدك الفني الذكي. كيف يمكنني مساعدتك في صيانة الأجهزة الطبية اليوم؟",
    chat_error: "عذراً، حدث خطأ أثناء معالجة طلبك.",
    reply_stopped: "تم إيقاف الرد.",
    analysis_empty: "لم يتمكن النظام من تحليل المشكلة حالياً.",
    analysis_error: "حدث خطأ أثناء الاتصال بخدمة الذكاء الاصطناعي. يرجى المحاولة مرة أخرى.",
    registry_empty: "لم يتم العثور على معلومات كافية في قاعدة البيانات العامة.",
    registry_error: "حدث خطأ أثناء الاتصال بقاعدة البيانات.",
    unknown_device: "جهاز غير معروف",
};

const ENGLISH_PHRASES: Phrases = Phrases {
    welcome: "Welcome! I am your technical assistant. How can I help with medical equipment maintenance today?",
    chat_error: "Sorry, something went wrong while processing your request.",
    reply_stopped: "Reply stopped.",
    analysis_empty: "The system could not analyze the issue right now.",
    analysis_error: "An error occurred while contacting the AI service. Please try again.",
    registry_empty: "Not enough information was found in public databases.",
    registry_error: "An error occurred while contacting the database.",
    unknown_device: "Unknown device",
};

impl WorkingLanguage {
    pub fn phrases(self) -> &'static Phrases {
        match self {
            WorkingLanguage::Arabic => &ARABIC_PHRASES,
            WorkingLanguage::English => &ENGLISH_PHRASES,
        }
    }
}

/// One element of a request's ordered content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(text) => Some(text),
            ContentPart::InlineData { .. } => None,
        }
    }
}

pub fn chat_system_instruction(language: WorkingLanguage) -> String {
    match language {
        WorkingLanguage::Arabic => "أنت مساعد فني ذكي متخصص في صيانة الأجهزة الطبية في المملكة العربية السعودية.\n\
             تحدث باللغة العربية بأسلوب مهني."
            .to_string(),
        WorkingLanguage::English => "You are a technical assistant specialized in medical equipment maintenance in Saudi Arabia.\n\
             Answer in English in a professional tone."
            .to_string(),
    }
}

pub fn build_chat_turn(text: &str) -> Vec<ContentPart> {
    vec![ContentPart::text(text)]
}

/// Image (when attached) first, then the instruction text.
pub fn build_issue_analysis(request: &AnalysisRequest, language: WorkingLanguage) -> Vec<ContentPart> {
    let mut parts = Vec::with_capacity(3);

    if let Some((mime_type, data)) = request.attached_image() {
        parts.push(ContentPart::InlineData {
            mime_type: mime_type.to_string(),
            data: data.to_vec(),
        });
        parts.push(ContentPart::text(match language {
            WorkingLanguage::Arabic => "قم بتحليل الصورة المرفقة لهذا الجهاز الطبي مع الوصف التالي:",
            WorkingLanguage::English => "Analyze the attached image of this medical device together with the following description:",
        }));
    }

    let device_name = if request.device_name.trim().is_empty() {
        language.phrases().unknown_device
    } else {
        request.device_name.as_str()
    };

    let instruction = match language {
        WorkingLanguage::Arabic => format!(
            "بصفتك خبير صيانة أجهزة طبية، قم بتحليل المشكلة التالية:\n\
             الجهاز: {}\n\
             العنوان: {}\n\
             الوصف: {}\n\n\
             قدم تشخيصًا أوليًا محتملاً وخطوات مقترحة للفني للتحقق منها.\n\
             اجعل الرد باللغة العربية.",
            device_name, request.title, request.description
        ),
        WorkingLanguage::English => format!(
            "As a medical equipment maintenance expert, analyze the following issue:\n\
             Device: {}\n\
             Title: {}\n\
             Description: {}\n\n\
             Provide a probable initial diagnosis and suggested steps for the technician to verify it.\n\
             Respond in English.",
            device_name, request.title, request.description
        ),
    };
    parts.push(ContentPart::Text(instruction));
    parts
}

pub fn build_registry_check(device_name: &str, serial_number: &str, language: WorkingLanguage) -> Vec<ContentPart> {
    let prompt = match language {
        WorkingLanguage::Arabic => format!(
            "قم بالبحث الدقيق في قاعدة بيانات الأجهزة الطبية والإنترنت عن الجهاز التالي: \"{}\" (الرقم التسلسلي: {}).\n\n\
             الهدف: التحقق من بيانات الجهاز وتوافقه مع معايير المملكة العربية السعودية (SFDA - الهيئة العامة للغذاء والدواء).\n\n\
             المطلوب:\n\
             1. حالة التسجيل أو الاعتماد (إذا توفرت معلومات عامة).\n\
             2. المواصفات الفنية الرئيسية.\n\
             3. بلد المنشأ والشركة المصنعة.\n\
             4. أي تحذيرات سلامة (Recalls) أو تنبيهات صيانة عالمية حديثة.\n\n\
             رتب المعلومات حسب الأهمية وقدم ملخصاً احترافياً باللغة العربية.",
            device_name, serial_number
        ),
        WorkingLanguage::English => format!(
            "Search medical device databases and the web thoroughly for the following device: \"{}\" (serial number: {}).\n\n\
             Goal: verify the device data and its compliance with Saudi Food and Drug Authority (SFDA) requirements.\n\n\
             Required:\n\
             1. Registration or approval status (if public information is available).\n\
             2. Key technical specifications.\n\
             3. Country of origin and manufacturer.\n\
             4. Any recent safety recalls or global maintenance notices.\n\n\
             Rank the findings by relevance and give a professional summary in English.",
            device_name, serial_number
        ),
    };
    vec![ContentPart::Text(prompt)]
}
