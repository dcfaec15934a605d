use crate::audio::{AudioFormat, InputAudioTranscription, TranscriptionModel, TurnDetection, Voice};
use crate::tools::{Tool, ToolChoice};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    /// The set of modalities the model can respond with. To disable audio, set this to ["text"].
    /// To enable audio, set this to ["text", "audio"].
    modalities: Vec<String>,

    /// The default system instructions prepended to model calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,

    /// Cannot be changed once the model has responded with audio at least once.
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<Voice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_format: Option<AudioFormat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_format: Option<AudioFormat>,

    /// Configuration for input audio transcription. Null turns it off.
    input_audio_transcription: Option<InputAudioTranscription>,

    /// Configuration for turn detection. Null turns it off.
    turn_detection: Option<TurnDetection>,

    /// Tools (functions) available to the model.
    tools: Vec<Tool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn modalities(&self) -> &[String] {
        &self.modalities
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub fn input_audio_format(&self) -> Option<AudioFormat> {
        self.input_audio_format
    }

    pub fn output_audio_format(&self) -> Option<AudioFormat> {
        self.output_audio_format
    }

    pub fn turn_detection(&self) -> Option<&TurnDetection> {
        self.turn_detection.as_ref()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }
}

pub struct SessionBuilder {
    session: Session,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            session: Session {
                modalities: vec!["text".to_string(), "audio".to_string()],
                instructions: None,
                voice: None,
                input_audio_format: None,
                output_audio_format: None,
                input_audio_transcription: None,
                turn_detection: None,
                tools: vec![],
                tool_choice: None,
                temperature: None,
            },
        }
    }

    pub fn with_modalities_enable_audio(mut self) -> Self {
        self.session.modalities = vec!["text".to_string(), "audio".to_string()];
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.session.instructions = Some(instructions.to_string());
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.session.voice = Some(voice);
        self
    }

    /// Sets the same codec for both directions.
    pub fn with_audio_format(mut self, format: AudioFormat) -> Self {
        self.session.input_audio_format = Some(format);
        self.session.output_audio_format = Some(format);
        self
    }

    pub fn with_input_audio_transcription_enable(mut self, model: TranscriptionModel) -> Self {
        self.session.input_audio_transcription = Some(InputAudioTranscription::new(model));
        self
    }

    pub fn with_turn_detection_enable(mut self, turn_detection: TurnDetection) -> Self {
        self.session.turn_detection = Some(turn_detection);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.session.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.session.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.session.temperature = Some(temperature);
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}

/// Per-response overrides attached to a `response.create` event.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

impl ResponseConfig {
    pub fn with_instructions(instructions: &str) -> Self {
        Self {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(instructions.to_string()),
        }
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }
}
