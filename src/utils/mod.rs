pub mod http_client;
pub mod machine_id;
