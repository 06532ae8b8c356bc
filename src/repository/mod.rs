pub mod dataset_store;
