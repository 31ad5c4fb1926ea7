fn main() {
    lyrisync_lib::run()
}
