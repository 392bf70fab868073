// Signal generators - per-sample DSP units driven by the render callback

pub mod oscillator;
pub mod ping_pong;

pub use oscillator::SineOscillator;
pub use ping_pong::PingPong;
