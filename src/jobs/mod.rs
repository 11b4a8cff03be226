pub mod klines_sync;
