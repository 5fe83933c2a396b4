mod session_buffer;
