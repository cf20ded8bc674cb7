//! Carga y gestión de configuración de la aplicación (modelos, chunking,
//! recuperación y rutas del índice persistido).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::chunker::ChunkConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Mistral,
    Groq,
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mistral" => Ok(Self::Mistral),
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Variable de entorno con la credencial del proveedor.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Mistral => "MISTRAL_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
        }
    }

    pub fn has_credentials(&self) -> bool {
        env::var(self.api_key_var())
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Modelo de chat concreto: proveedor + nombre.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatModelConfig {
    pub provider: LlmProvider,
    pub model: String,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub embedding_provider: LlmProvider,
    pub embedding_model: String,
    pub primary: ChatModelConfig,
    /// `None` cuando falta la credencial del respaldo: respaldo desactivado.
    pub fallback: Option<ChatModelConfig>,

    pub chunking: ChunkConfig,
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_chars: usize,
    pub embed_batch_size: usize,

    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let embedding_provider =
            LlmProvider::from_str(&env_or("EMBEDDING_PROVIDER", "mistral"))?;
        if embedding_provider == LlmProvider::Groq {
            return Err(anyhow!("Groq no ofrece modelos de embeddings"));
        }
        let embedding_model = env_or("EMBEDDING_MODEL", "mistral-embed");

        let primary = ChatModelConfig {
            provider: LlmProvider::from_str(&env_or("LLM_PROVIDER", "mistral"))?,
            model: env_or("LLM_CHAT_MODEL", "mistral-large-latest"),
        };
        let fallback_candidate = ChatModelConfig {
            provider: LlmProvider::from_str(&env_or("FALLBACK_PROVIDER", "groq"))?,
            model: env_or("FALLBACK_CHAT_MODEL", "llama-3.3-70b-versatile"),
        };
        let fallback = fallback_candidate
            .provider
            .has_credentials()
            .then_some(fallback_candidate);

        let chunking = ChunkConfig::new(
            parse_env("RAG_CHUNK_SIZE", 500)?,
            parse_env("RAG_CHUNK_OVERLAP", 80)?,
        )?;

        Ok(Self {
            server_addr,
            embedding_provider,
            embedding_model,
            primary,
            fallback,
            chunking,
            top_k: parse_env("RAG_TOP_K", 5)?,
            min_score: parse_env("RAG_MIN_SCORE", 0.5)?,
            max_context_chars: parse_env("RAG_MAX_CONTEXT_CHARS", 8000)?,
            embed_batch_size: parse_env("RAG_EMBED_BATCH_SIZE", 16)?,
            index_path: PathBuf::from(env_or("RAG_INDEX_PATH", "data/metadata/vector_store.idx")),
            metadata_path: PathBuf::from(env_or("RAG_METADATA_PATH", "data/metadata/chunks.jsonl")),
        })
    }

    /// Comprueba las credenciales imprescindibles antes de servir o ingerir.
    pub fn require_credentials(&self, need_chat: bool) -> Result<()> {
        if !self.embedding_provider.has_credentials() {
            return Err(anyhow!(
                "Falta {} en el entorno (modelo de embeddings)",
                self.embedding_provider.api_key_var()
            ));
        }
        if need_chat && !self.primary.provider.has_credentials() {
            return Err(anyhow!(
                "Falta {} en el entorno (modelo de chat principal)",
                self.primary.provider.api_key_var()
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!(LlmProvider::from_str("Mistral").unwrap(), LlmProvider::Mistral);
        assert_eq!(LlmProvider::from_str(" groq ").unwrap(), LlmProvider::Groq);
        assert_eq!(LlmProvider::from_str("openai").unwrap(), LlmProvider::OpenAI);
        assert!(LlmProvider::from_str("gemini").is_err());
        assert_eq!(LlmProvider::Groq.api_key_var(), "GROQ_API_KEY");
    }

    #[test]
    fn parse_env_uses_default_and_rejects_garbage() {
        assert_eq!(parse_env("RAG_CAMPUS_TEST_UNSET_VAR", 7usize).unwrap(), 7);
        env::set_var("RAG_CAMPUS_TEST_BAD_TOP_K", "cinq");
        assert!(parse_env::<usize>("RAG_CAMPUS_TEST_BAD_TOP_K", 5).is_err());
        env::set_var("RAG_CAMPUS_TEST_MIN_SCORE", " 0.72 ");
        assert_eq!(parse_env::<f32>("RAG_CAMPUS_TEST_MIN_SCORE", 0.5).unwrap(), 0.72);
    }
}
