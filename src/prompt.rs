//! Construcción de prompts según el modo pedagógico.
//!
//! Los prompts están en francés, la lengua de los cursos.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::models::RetrievedChunk;

/// Modo de respuesta. Conjunto cerrado: cualquier otro valor se rechaza.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Mode {
    #[default]
    Standard,
    Beginner,
    Exercise,
    Revision,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Beginner => "beginner",
            Self::Exercise => "exercise",
            Self::Revision => "revision",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::Standard => {
                "Réponds de manière concise et directe, en citant les passages fournis."
            }
            Self::Beginner => {
                "Explique comme à un débutant : vocabulaire simple, étapes courtes, \
                 un exemple concret pour chaque notion."
            }
            Self::Exercise => {
                "Ne donne pas la réponse directement. Pose une question guide, \
                 puis propose une piste progressive basée sur les extraits."
            }
            Self::Revision => {
                "Rédige une fiche de révision : résumé en puces, définitions clés \
                 mises en évidence, uniquement à partir des extraits."
            }
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "beginner" => Ok(Self::Beginner),
            "exercise" => Ok(Self::Exercise),
            "revision" | "review" | "revise" => Ok(Self::Revision),
            _ => Err(RagError::UnknownMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

const SYSTEM_PROMPT: &str = "Tu es un assistant pédagogique spécialisé en algorithmique. \
Réponds uniquement à partir des extraits fournis. Si l'information n'est pas dans le contexte, \
dis-le clairement. Cite les passages entre crochets [n].";

const OUT_OF_CONTEXT_SYSTEM: &str = "Tu es un assistant pédagogique. Aucun extrait du cours \
n'est pertinent pour cette question : indique-le explicitement sans inventer de contenu.";

/// Respuesta determinista cuando ningún chunk supera el umbral.
pub const OUT_OF_CONTEXT_ANSWER: &str = "Je n'ai trouvé aucun passage pertinent dans le cours \
(réponse hors contexte, aucune source utilisée). Reformule la question ou vérifie que le sujet \
fait bien partie des chapitres disponibles.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system_text: String,
    pub user_text: String,
    /// Número de chunks inyectados tras aplicar el presupuesto de contexto.
    pub included_chunks: usize,
}

impl Prompt {
    pub fn is_out_of_context(&self) -> bool {
        self.included_chunks == 0
    }
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    pub fn build(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        mode: Mode,
        chapter: Option<u32>,
    ) -> Prompt {
        if chunks.is_empty() {
            return Prompt {
                system_text: OUT_OF_CONTEXT_SYSTEM.to_string(),
                user_text: format!(
                    "Question: {question}\nContexte: aucun extrait pertinent.\n\
                     Réponds exactement: {OUT_OF_CONTEXT_ANSWER}"
                ),
                included_chunks: 0,
            };
        }

        let (context, included_chunks) = self.format_context(chunks);
        let chapter_line = chapter
            .map(|c| format!("Chapitre ciblé: {c}\n"))
            .unwrap_or_default();
        let user_text = format!(
            "Question: {question}\nMode: {mode}\n{chapter_line}Consigne: {}\n\nContexte:\n{context}",
            mode.instruction()
        );

        Prompt {
            system_text: SYSTEM_PROMPT.to_string(),
            user_text,
            included_chunks,
        }
    }

    /// Inyecta los chunks por orden de rango hasta agotar el presupuesto.
    /// Los de menor rango son los primeros en caer.
    fn format_context(&self, chunks: &[RetrievedChunk]) -> (String, usize) {
        let mut blocks = Vec::new();
        let mut used = 0usize;

        for (idx, retrieved) in chunks.iter().enumerate() {
            let text = &retrieved.chunk.text;
            let len = text.chars().count();
            if used + len > self.max_context_chars {
                if blocks.is_empty() {
                    let cut: String = text.chars().take(self.max_context_chars).collect();
                    blocks.push(format_block(idx + 1, retrieved, &cut));
                }
                break;
            }
            used += len;
            blocks.push(format_block(idx + 1, retrieved, text));
        }

        let count = blocks.len();
        (blocks.join("\n\n"), count)
    }
}

fn format_block(n: usize, retrieved: &RetrievedChunk, text: &str) -> String {
    format!("[{n}] {}\n{text}", retrieved.chunk.citation())
}
