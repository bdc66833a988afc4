/// Routes panics through tracing so they show up in structured logs instead
/// of only on stderr.
pub fn install() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("thread panicked: {info}");
        default_hook(info);
    }));
}
