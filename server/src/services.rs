pub mod dumpservice;
