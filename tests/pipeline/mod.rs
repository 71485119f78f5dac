mod rpc_client;
mod watcher;
