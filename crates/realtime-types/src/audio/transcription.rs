use crate::audio::TranscriptionModel;

/// Enables transcription of the caller's audio, which is what produces the
/// `conversation.item.input_audio_transcription.completed` events.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscription {
    model: TranscriptionModel,
}

impl Default for InputAudioTranscription {
    fn default() -> Self {
        Self {
            model: TranscriptionModel::Whisper,
        }
    }
}

impl InputAudioTranscription {
    pub fn new(model: TranscriptionModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &TranscriptionModel {
        &self.model
    }
}
