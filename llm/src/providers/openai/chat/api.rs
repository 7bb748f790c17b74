use crate::api::{ChatMessage, ChatRequest, ContentBlock, Role};
use crate::error::LlmError;
use serde::{Deserialize, Serialize};

/// OpenAI content part for multimodal messages
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlContent },
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ImageUrlContent {
    pub url: String,
}

/// OpenAI message content - can be a string or array of parts
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl From<&ChatMessage> for Message {
    fn from(msg: &ChatMessage) -> Self {
        // Plain text messages use the simple string form
        if !msg.has_images() {
            return Message {
                role: msg.role,
                content: MessageContent::Text(msg.get_text()),
            };
        }

        let parts = msg
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => ContentPart::Text { text: text.clone() },
                ContentBlock::Image { data, mime_type } => ContentPart::ImageUrl {
                    image_url: ImageUrlContent {
                        url: format!("data:{};base64,{}", mime_type, data),
                    },
                },
            })
            .collect();

        Message {
            role: msg.role,
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn from_request(model: String, request: &ChatRequest, stream: bool) -> Self {
        ChatCompletionRequest {
            model,
            messages: request.messages.iter().map(Message::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatCompletionChoice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
}

impl ChatCompletionResponse {
    pub fn into_message(self) -> Result<ChatMessage, LlmError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::UnexpectedResponse("response has no choices".to_string()))?;
        Ok(ChatMessage::assistant(choice.message.content.unwrap_or_default()))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ChatCompletionChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatCompletionChunkChoice {
    #[serde(default)]
    pub delta: ChatCompletionChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<ChatCompletionChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn text(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Model {
    pub id: String,
    /// OpenRouter provides a human-readable name
    #[serde(default)]
    pub name: Option<String>,
}

impl From<Model> for crate::ModelDefinition {
    fn from(model: Model) -> Self {
        crate::ModelDefinition {
            id: model.id,
            display_name: model.name,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ListModelsResponse {
    pub data: Vec<Model>,
}
