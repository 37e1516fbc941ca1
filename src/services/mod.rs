pub mod evaluation;
pub mod rating_store;
pub mod recommendation;
pub mod training;
