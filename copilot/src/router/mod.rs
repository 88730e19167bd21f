//! Conversation routing: decides which mode a turn is in and whether the
//! risk persona joins the panel.

pub mod classifier;

pub use classifier::{
    ClassifierContext, ClassifierError, ConversationMode, ModeAnalysis, ModeClassifier,
    RiskSignal,
};
