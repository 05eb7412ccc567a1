pub mod authors;
pub mod books;
pub mod downloads;
pub mod genres;
pub mod sequences;
pub mod stats;
pub mod translators;
