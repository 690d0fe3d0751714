pub mod publisher_config;
