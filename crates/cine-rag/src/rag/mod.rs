//! Retrieval-augmented answering: the tag protocol and the conversational chain.

pub mod orchestrator;
pub mod tag_extractor;

pub use orchestrator::{
    ChainAnswer, ChainConfig, ChainStage, ConversationalRetrievalChain, RetrievalMode, StageTimings,
};
pub use tag_extractor::{extract_answer, extract_tag, parse_yes_no, YesNo, ANSWER_TAG};
