pub mod decoders;
