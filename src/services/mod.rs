pub mod row_builder;
