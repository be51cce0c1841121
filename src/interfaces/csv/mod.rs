//! CSV adapters used by the command-line producer.

pub mod account_reader;
pub mod account_writer;
pub mod intent_reader;

fn reader_builder() -> ::csv::ReaderBuilder {
    let mut builder = ::csv::ReaderBuilder::new();
    builder.trim(::csv::Trim::All).flexible(true);
    builder
}
