pub mod nmap;
pub mod regex;
